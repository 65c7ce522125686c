use chrono::{Duration, NaiveDateTime, Utc};
use commentstreams_api::{Uuid, DEFAULT_NAMESPACE_INDEX};
use rand::{seq::SliceRandom, Rng};

const NUM_USERS: usize = 5;
const NUM_PAGES: usize = 20;

const NUM_DISCUSSIONS: usize = 60;
const DISCUSSION_TITLE_WORDS: usize = 5;

const NUM_REPLIES: usize = 200;
const NUM_COMMENT_EDITS: usize = 40;
const COMMENT_WORD_COUNT: usize = 40;

// keep all generated dates in the past year
const MAX_AGE_MINUTES: i64 = 60 * 24 * 365;

fn gen_n_items(table: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    println!("INSERT INTO {} VALUES", table);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn gen_date() -> NaiveDateTime {
    let age = Duration::minutes(rand::thread_rng().gen_range(0..MAX_AGE_MINUTES));
    (Utc::now() - age).naive_utc()
}

fn gen_comment_text() -> String {
    lipsum::lipsum_words(COMMENT_WORD_COUNT)
}

struct GenComment {
    id: usize,
    page: usize,
    date: NaiveDateTime,
}

fn main() {
    let mut rng = rand::thread_rng();

    // Generate users, each with an open session
    let users = (1..=NUM_USERS).collect::<Vec<_>>();
    gen_n_items("users", NUM_USERS, |i| {
        format!(
            "({}, {}, {}, {}, {})",
            users[i],
            quote(&format!("User{}", users[i])),
            match i % 2 {
                0 => quote(&lipsum::lipsum_words(2)),
                _ => String::from("NULL"),
            },
            // the last user is read-only
            i + 1 != NUM_USERS,
            match i % 3 {
                0 => String::from("NULL"),
                _ => quote(&format!("/avatars/User{}.png", users[i])),
            },
        )
    });
    gen_n_items("sessions", NUM_USERS, |i| {
        let token = Uuid::new_v4();
        eprintln!("session token for User{}: {}", users[i], token);
        format!(
            "({}, {}, {}, 'generate-test-data', NOW(), NOW())",
            quote(&token.to_string()),
            users[i],
            quote(&Uuid::new_v4().to_string()),
        )
    });
    let gen_user = || -> usize { *users.choose(&mut rand::thread_rng()).unwrap() };

    // Generate content pages, in the main namespace
    let pages = (1..=NUM_PAGES).collect::<Vec<_>>();
    gen_n_items("pages", NUM_PAGES, |i| {
        format!("({}, 0, {}, false)", pages[i], quote(&lipsum::lipsum_title()))
    });
    gen_n_items("revisions", NUM_PAGES, |i| {
        format!(
            "(DEFAULT, {}, {}, '{}', {}, NULL)",
            pages[i],
            gen_user(),
            gen_date(),
            quote(&lipsum::lipsum(COMMENT_WORD_COUNT * 4)),
        )
    });

    // Generate comment pages, discussions first so that replies can point to them
    let mut discussions = Vec::new();
    let mut replies = Vec::new();
    let first_comment_id = NUM_PAGES + 1;
    for id in first_comment_id..first_comment_id + NUM_DISCUSSIONS {
        discussions.push(GenComment {
            id,
            page: *pages.choose(&mut rng).unwrap(),
            date: gen_date(),
        });
    }
    for id in first_comment_id + NUM_DISCUSSIONS..first_comment_id + NUM_DISCUSSIONS + NUM_REPLIES
    {
        let parent = discussions.choose(&mut rng).unwrap();
        let offset = Duration::minutes(rng.gen_range(1..MAX_AGE_MINUTES));
        replies.push((
            parent.id,
            GenComment {
                id,
                page: parent.page,
                date: std::cmp::min(parent.date + offset, Utc::now().naive_utc()),
            },
        ));
    }
    let all_comments = discussions
        .iter()
        .chain(replies.iter().map(|(_, c)| c))
        .collect::<Vec<_>>();

    gen_n_items("pages", all_comments.len(), |i| {
        format!(
            "({}, {}, {}, false)",
            all_comments[i].id,
            DEFAULT_NAMESPACE_INDEX,
            quote(&format!("Comment{}", all_comments[i].id)),
        )
    });
    gen_n_items("revisions", all_comments.len(), |i| {
        format!(
            "(DEFAULT, {}, {}, '{}', {}, NULL)",
            all_comments[i].id,
            gen_user(),
            all_comments[i].date,
            quote(&gen_comment_text()),
        )
    });
    gen_n_items("cs_comments", discussions.len(), |i| {
        format!(
            "({}, {}, NULL, {})",
            discussions[i].id,
            discussions[i].page,
            quote(&lipsum::lipsum_words(DISCUSSION_TITLE_WORDS)),
        )
    });
    gen_n_items("cs_comments", replies.len(), |i| {
        let (parent, c) = &replies[i];
        format!("({}, {}, {}, NULL)", c.id, c.page, parent)
    });

    // Later edits, possibly by someone else than the author, must not change authorship
    gen_n_items("revisions", NUM_COMMENT_EDITS, |_| {
        let c = all_comments.choose(&mut rand::thread_rng()).unwrap();
        format!(
            "(DEFAULT, {}, {}, '{}', {}, NULL)",
            c.id,
            gen_user(),
            c.date + Duration::seconds(1),
            quote(&gen_comment_text()),
        )
    });

    println!("SELECT setval('users_id_seq', (SELECT MAX(id) FROM users));");
    println!("SELECT setval('pages_id_seq', (SELECT MAX(id) FROM pages));");
}
