use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request},
};
use commentstreams_api::{Actor, AuthToken, Config, CsrfToken, Uuid};

use crate::{db, Error, ReplyNotifier, UserFeeds};

pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub feeds: UserFeeds,
    pub config: Arc<Config>,
    pub notifier: ReplyNotifier,
}

#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }
}

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Session token from the `Authorization: Bearer` header, not yet checked against the database
pub struct PreAuth(pub AuthToken);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        match req.headers.get(http::header::AUTHORIZATION) {
            None => Err(Error::permission_denied()),
            Some(auth) => {
                let auth = auth.to_str().map_err(|_| Error::permission_denied())?;
                let mut auth = auth.split(' ');
                if !auth
                    .next()
                    .ok_or(Error::permission_denied())?
                    .eq_ignore_ascii_case("bearer")
                {
                    return Err(Error::permission_denied());
                }
                let token = auth.next().ok_or(Error::permission_denied())?;
                if auth.next().is_some() {
                    return Err(Error::permission_denied());
                }
                let token = Uuid::try_from(token).map_err(|_| Error::permission_denied())?;
                Ok(PreAuth(AuthToken(token)))
            }
        }
    }
}

/// CSRF token echoed back by the client, not yet checked against the session
pub struct CsrfHeader(pub CsrfToken);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for CsrfHeader {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<CsrfHeader, Error> {
        let token = req
            .headers
            .get(CSRF_HEADER)
            .ok_or(Error::invalid_csrf_token())?
            .to_str()
            .map_err(|_| Error::invalid_csrf_token())?;
        let token = Uuid::try_from(token.trim()).map_err(|_| Error::invalid_csrf_token())?;
        Ok(CsrfHeader(CsrfToken(token)))
    }
}

pub struct Auth(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        let mut conn = PgConn::from_request_parts(req, state).await?;
        let session = db::recover_session(&mut *conn, token).await?;
        Ok(Auth(db::fetch_actor(&mut *conn, session.user).await?))
    }
}

/// Readers without an `Authorization` header are anonymous, a bad header is still refused
pub struct MaybeAuth(pub Option<Actor>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<MaybeAuth, Error> {
        if !req.headers.contains_key(http::header::AUTHORIZATION) {
            return Ok(MaybeAuth(None));
        }
        Ok(MaybeAuth(Some(Auth::from_request_parts(req, state).await?.0)))
    }
}

/// Authenticated actor of a state-changing request, whose CSRF header matched its session
pub struct CsrfAuth(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for CsrfAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<CsrfAuth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        let csrf = CsrfHeader::from_request_parts(req, state).await?.0;
        let mut conn = PgConn::from_request_parts(req, state).await?;
        let session = db::recover_session(&mut *conn, token).await?;
        if session.csrf != csrf {
            return Err(Error::invalid_csrf_token());
        }
        Ok(CsrfAuth(db::fetch_actor(&mut *conn, session.user).await?))
    }
}
