#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub i64);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub real_name: Option<String>,
}

impl User {
    /// Name shown next to comments: the real name if the user set one
    pub fn display_name(&self) -> &str {
        match &self.real_name {
            Some(real) if !real.trim().is_empty() => real,
            _ => &self.name,
        }
    }
}
