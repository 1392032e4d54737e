//! Create a table, populate it and read it back, with two custom SQL
//! functions and a converter.
//!
//! Run with `cargo run --example users`; set `RUST_LOG=litekit=debug` to see
//! connection and statement activity.

use litekit::{create_function, register_converter, Database, Deserialize, Query};

static DB: Database = Database::new("users-demo.db");

static CREATE_USERS: Query = Query::new(
    "create table if not exists users (first_name text, last_name text, age integer, website text)",
);
static CLEAR_USERS: Query = Query::new("delete from users");
static INSERT_USER: Query = Query::new("insert into users values (?1, ?2, ?3, ?4)");
static SELECT_USERS: Query = Query::new(
    "select first_name, last_name, next_year(age), shout(shout(website))
     from users where age = ?1 or substr(first_name, 1, 1) = ?2",
);

/// Text read from SQL and tagged on the way through.
struct Shouted(String);

impl Deserialize for Shouted {
    type Source<'r> = Option<&'r str>;

    fn deserialize(text: Option<&str>) -> litekit::Result<Self> {
        Ok(Shouted(text.unwrap_or_default().to_owned()))
    }
}

register_converter!(deserialize Shouted);

fn shout(Shouted(mut text): Shouted) -> String {
    text.push_str(" HI");
    text
}

fn main() -> litekit::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "litekit=info".into()),
        )
        .init();

    create_function("next_year", |age: i64| age + 1)?;
    create_function("shout", shout)?;

    DB.execute(&CREATE_USERS, &())?;
    DB.execute(&CLEAR_USERS, &())?;

    let tx = DB.transaction()?;
    DB.execute(&INSERT_USER, &("John", "Doe", 29, Some("google.com")))?;
    DB.execute(&INSERT_USER, &("Mary", "Smith", 28, None::<&str>))?;
    DB.execute(&INSERT_USER, &("James", "Smith", 20, Some("yahoo.com")))?;
    tx.commit()?;

    let mut rows = DB.query(&SELECT_USERS, &(29, "M"))?;
    while let Some((first, last, age, website)) = rows.fetch::<(&str, &str, i64, Option<&str>)>()? {
        println!("{first} {last}, {age}, {}", website.unwrap_or("<no website>"));
    }

    tracing::info!(
        target: "litekit",
        prepared = DB.statements_prepared(),
        "done"
    );
    Ok(())
}
