//! End-to-end scenarios over the user/blog schema.

use entimap_testkit::prelude::*;

fn user_row(session: &TestSession) -> Row {
    session
        .store()
        .peek("user", &Value::Integer(1))
        .unwrap()
        .expect("user#1 is stored")
}

#[test]
fn insert_user_then_blog_in_one_transaction() {
    init_tracing();
    let mut session = TestSession::blog();
    seed_user_and_blog(&mut session);

    let report = session.flush().unwrap();
    assert_eq!(report.inserts, 2);
    assert_eq!(report.writes(), 2);

    assert_eq!(
        session.store().statements(),
        vec![
            Statement::Begin,
            Statement::Insert {
                table: "user".into(),
                values: Row::new()
                    .with("id", 1)
                    .with("name", "Some User")
                    .with("balance", 5000),
            },
            Statement::Insert {
                table: "blog".into(),
                values: Row::new()
                    .with("id", 1)
                    .with("title", "Test Blog")
                    .with("author_id", 1),
            },
            Statement::Commit,
        ]
    );
}

#[test]
fn loading_blog_leaves_nothing_to_flush() {
    init_tracing();
    let mut session = seeded_blog_session();

    let blog = session.find_one_or_fail("blog", 1).unwrap();
    assert_eq!(blog.get("title").unwrap(), Value::from("Test Blog"));
    assert_eq!(session.state_of(&blog), EntityState::Managed);

    assert!(session.compute_change_sets().unwrap().is_empty());
    assert!(session.flush().unwrap().is_empty());
    assert!(session.store().writes().is_empty());

    let user = user_row(&session);
    assert_eq!(user.get("name"), Some(&Value::from("Some User")));
    assert_eq!(user.get("balance"), Some(&Value::Integer(5000)));
}

#[test]
fn reading_author_through_blog_leaves_nothing_to_flush() {
    init_tracing();
    let mut session = seeded_blog_session();

    let blog = session.find_one_or_fail("blog", 1).unwrap();
    let author = session.resolve(&blog, "author").unwrap().expect("blog has an author");
    assert_eq!(author.get("name").unwrap(), Value::from("Some User"));

    // The inverse side, from the user back to the blog.
    let back = session.resolve(&author, "blog").unwrap().expect("user has a blog");
    assert!(back.ptr_eq(&blog));

    assert!(session.compute_change_sets().unwrap().is_empty());
    assert!(!session.is_dirty(&author).unwrap());
    assert!(!session.is_dirty(&blog).unwrap());

    assert!(session.flush().unwrap().is_empty());
    assert!(session.store().writes().is_empty());

    let user = user_row(&session);
    assert_eq!(user.get("name"), Some(&Value::from("Some User")));
    assert_eq!(user.get("balance"), Some(&Value::Integer(5000)));
}

#[test]
fn loading_user_first_binds_blog_author() {
    let mut session = seeded_blog_session();

    let user = session.find_one_or_fail("user", 1).unwrap();
    let blog = session.find_one_or_fail("blog", 1).unwrap();
    match blog.reference("author").unwrap() {
        Reference::Entity(author) => assert!(author.ptr_eq(&user)),
        other => panic!("expected a bound author, got {other:?}"),
    }
    assert!(session.compute_change_sets().unwrap().is_empty());
}

#[test]
fn defaults_are_sent_on_insert() {
    let mut session = TestSession::blog();
    session.create("user", Row::new().with("id", 2)).unwrap();
    session.flush().unwrap();

    let writes = session.store().writes();
    assert_eq!(
        writes,
        vec![Statement::Insert {
            table: "user".into(),
            values: Row::new().with("id", 2).with("name", "Default").with("balance", 0),
        }]
    );
}
