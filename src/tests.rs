use crate::analytics::{AnalyticsService, NewGoal, NewSession};
use crate::auth::AuthService;
use crate::config::{BookFormat, Config};
use crate::db::{
    BookFilter, BookSort, Database, DownloadLink, GoalKind, GoalPeriod, User, now_timestamp,
};
use crate::error::AppError;
use crate::library::{
    Book, Bookmark, Collection, DEFAULT_COLLECTION_NAME, Highlight, HighlightColor,
    HighlightPosition, Location, ProgressUpdate, ReadingStatus,
};
use crate::reader::SessionSummary;
use crate::server::{AppState, create_router};
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode, header},
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::net::SocketAddr;
use tower::ServiceExt;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str, username: &str) {
    let user = User {
        id: id.to_string(),
        username: username.to_string(),
        password_hash: "hash".to_string(),
        display_name: None,
        role: "user".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };
    db.create_user(&user).unwrap();
}

fn create_book(db: &Database, user_id: &str, id: &str, title: &str) -> Book {
    let mut book = Book::new(user_id, BookFormat::Pdf, format!("{}.pdf", id), "file.pdf");
    book.id = id.to_string();
    book.title = title.to_string();
    book.total_pages = Some(200);
    db.save_book(&book).unwrap();
    book
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

fn bookmark(id: &str, user_id: &str, book_id: &str, page: u32) -> Bookmark {
    Bookmark {
        id: id.to_string(),
        book_id: book_id.to_string(),
        user_id: user_id.to_string(),
        location: Location::Page { page },
        note: None,
        created_at: at(2024, 1, 1),
        updated_at: at(2024, 1, 1),
    }
}

fn highlight(id: &str, user_id: &str, book_id: &str, page: u32, created: DateTime<Utc>) -> Highlight {
    Highlight {
        id: id.to_string(),
        book_id: book_id.to_string(),
        user_id: user_id.to_string(),
        text: format!("passage {}", id),
        color: HighlightColor::default(),
        note: None,
        position: HighlightPosition::Pdf {
            page,
            rects: Vec::new(),
        },
        created_at: created,
        updated_at: created,
    }
}

fn collection(id: &str, user_id: &str, name: &str) -> Collection {
    Collection {
        id: id.to_string(),
        user_id: user_id.to_string(),
        name: name.to_string(),
        book_ids: Vec::new(),
        is_default: false,
        created_at: at(2024, 1, 1),
    }
}

fn setup_two_users(db: &Database) {
    create_user(db, "alice", "alice");
    create_user(db, "bob", "bob");
    create_book(db, "alice", "book-a", "Alice's Book");
}

fn auth(db: &Database) -> AuthService {
    AuthService::new(db.clone(), 30, true)
}

// ========== USERS ==========

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    let found = db.get_user_by_username("alice").unwrap().unwrap();
    assert_eq!(found.id, "user-1");

    let found_by_id = db.get_user_by_id("user-1").unwrap().unwrap();
    assert_eq!(found_by_id.username, "alice");
}

#[test]
fn db_duplicate_username_conflicts() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    let dup = User {
        id: "user-2".to_string(),
        username: "alice".to_string(),
        password_hash: "hash2".to_string(),
        display_name: None,
        role: "user".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };
    assert!(matches!(db.create_user(&dup), Err(AppError::Conflict(_))));
    // the failed insert left no orphan collection behind
    assert!(db.list_collections("user-2").unwrap().is_empty());
}

#[test]
fn db_new_user_has_default_collection() {
    let db = test_db();
    create_user(&db, "user-1", "alice");

    let collections = db.list_collections("user-1").unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].name, DEFAULT_COLLECTION_NAME);
    assert!(collections[0].is_default);
}

// ========== OWNER SCOPING ==========

#[test]
fn db_books_are_owner_scoped() {
    let db = test_db();
    setup_two_users(&db);

    assert!(db.get_book("bob", "book-a").unwrap().is_none());
    assert!(db.list_books("bob", &BookFilter::default()).unwrap().is_empty());
    assert!(!db.delete_book("bob", "book-a").unwrap());

    // an upsert under another owner does not take the row over
    let mut hijack = db.get_book("alice", "book-a").unwrap().unwrap();
    hijack.user_id = "bob".to_string();
    hijack.title = "Mine now".to_string();
    db.save_book(&hijack).unwrap();

    let book = db.get_book("alice", "book-a").unwrap().unwrap();
    assert_eq!(book.title, "Alice's Book");
    assert!(db.get_book("bob", "book-a").unwrap().is_none());
}

#[test]
fn db_annotations_are_owner_scoped() {
    let db = test_db();
    setup_two_users(&db);
    db.save_bookmark(&bookmark("bm-1", "alice", "book-a", 3)).unwrap();
    db.save_highlight(&highlight("hl-1", "alice", "book-a", 3, at(2024, 1, 1)))
        .unwrap();

    assert!(db.get_bookmark("bob", "bm-1").unwrap().is_none());
    assert!(db.get_bookmarks("bob", "book-a").unwrap().is_empty());
    assert!(!db.delete_bookmark("bm-1", "bob").unwrap());

    assert!(db.get_highlight("bob", "hl-1").unwrap().is_none());
    assert!(db.get_highlights("bob", "book-a").unwrap().is_empty());
    assert!(!db.delete_highlight("hl-1", "bob").unwrap());

    let mut edit = bookmark("bm-1", "bob", "book-a", 99);
    edit.note = Some("overwritten".to_string());
    db.save_bookmark(&edit).unwrap();
    let kept = db.get_bookmark("alice", "bm-1").unwrap().unwrap();
    assert_eq!(kept.location, Location::Page { page: 3 });
    assert_eq!(kept.note, None);
}

#[test]
fn db_collections_are_owner_scoped() {
    let db = test_db();
    setup_two_users(&db);
    db.create_collection(&collection("col-1", "alice", "Sci-Fi")).unwrap();

    assert!(db.get_collection("bob", "col-1").unwrap().is_none());
    assert!(!db.rename_collection("bob", "col-1", "Bob's").unwrap());
    assert!(!db.delete_collection("bob", "col-1").unwrap());
    assert!(db.get_collection("alice", "col-1").unwrap().is_some());
}

// ========== COLLECTIONS ==========

#[test]
fn db_default_collection_cannot_be_removed() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    let default = db.list_collections("alice").unwrap().remove(0);

    assert!(!db.delete_collection("alice", &default.id).unwrap());
    assert!(!db.rename_collection("alice", &default.id, "Other").unwrap());

    let again = db.get_collection("alice", &default.id).unwrap().unwrap();
    assert_eq!(again.name, DEFAULT_COLLECTION_NAME);
}

#[test]
fn db_collection_keeps_insertion_order_without_duplicates() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    for (id, title) in [("b1", "Zeta"), ("b2", "Alpha"), ("b3", "Mid")] {
        create_book(&db, "alice", id, title);
    }
    db.create_collection(&collection("col-1", "alice", "Queue")).unwrap();

    assert!(db.add_book_to_collection("col-1", "b3").unwrap());
    assert!(db.add_book_to_collection("col-1", "b1").unwrap());
    assert!(!db.add_book_to_collection("col-1", "b3").unwrap());
    assert!(db.add_book_to_collection("col-1", "b2").unwrap());

    let col = db.get_collection("alice", "col-1").unwrap().unwrap();
    assert_eq!(col.book_ids, vec!["b3", "b1", "b2"]);

    assert!(db.remove_book_from_collection("col-1", "b1").unwrap());
    assert!(!db.remove_book_from_collection("col-1", "b1").unwrap());
    let col = db.get_collection("alice", "col-1").unwrap().unwrap();
    assert_eq!(col.book_ids, vec!["b3", "b2"]);
}

#[test]
fn db_duplicate_collection_name_conflicts() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    db.create_collection(&collection("col-1", "alice", "Queue")).unwrap();

    let result = db.create_collection(&collection("col-2", "alice", "Queue"));
    assert!(matches!(result, Err(AppError::Conflict(_))));

    // names are per user
    create_user(&db, "bob", "bob");
    db.create_collection(&collection("col-3", "bob", "Queue")).unwrap();
}

// ========== BOOKS ==========

#[test]
fn db_delete_book_cascades() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    create_book(&db, "alice", "book-a", "Doomed");
    create_book(&db, "alice", "book-b", "Survivor");

    db.save_bookmark(&bookmark("bm-1", "alice", "book-a", 1)).unwrap();
    db.save_highlight(&highlight("hl-1", "alice", "book-a", 1, at(2024, 1, 1)))
        .unwrap();
    db.save_bookmark(&bookmark("bm-2", "alice", "book-b", 1)).unwrap();
    db.create_collection(&collection("col-1", "alice", "Shelf")).unwrap();
    db.add_book_to_collection("col-1", "book-a").unwrap();
    db.add_book_to_collection("col-1", "book-b").unwrap();

    let analytics = AnalyticsService::new(db.clone());
    analytics
        .log_session("alice", new_session("book-a", Utc::now(), 600, 1, 5))
        .unwrap();

    assert!(db.delete_book("alice", "book-a").unwrap());

    assert!(db.get_bookmarks("alice", "book-a").unwrap().is_empty());
    assert!(db.get_highlights("alice", "book-a").unwrap().is_empty());
    assert!(analytics.sessions("alice", Some("book-a")).unwrap().is_empty());
    assert_eq!(
        db.get_collection("alice", "col-1").unwrap().unwrap().book_ids,
        vec!["book-b"]
    );
    assert_eq!(db.get_bookmarks("alice", "book-b").unwrap().len(), 1);
}

#[test]
fn db_list_books_filter_and_sort() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    let mut dune = create_book(&db, "alice", "b1", "Dune");
    dune.author = Some("Frank Herbert".to_string());
    dune.record_progress(
        &ProgressUpdate {
            current_page: Some(150),
            ..Default::default()
        },
        at(2024, 2, 1),
    );
    db.save_book(&dune).unwrap();

    let mut emma = create_book(&db, "alice", "b2", "emma");
    emma.record_progress(
        &ProgressUpdate {
            current_page: Some(20),
            ..Default::default()
        },
        at(2024, 3, 1),
    );
    db.save_book(&emma).unwrap();

    create_book(&db, "alice", "b3", "100%_Pure");

    let titles = |filter: BookFilter| -> Vec<String> {
        db.list_books("alice", &filter)
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect()
    };

    assert_eq!(
        titles(BookFilter {
            sort: BookSort::Title,
            ..Default::default()
        }),
        vec!["100%_Pure", "Dune", "emma"]
    );
    assert_eq!(
        titles(BookFilter {
            sort: BookSort::Progress,
            ..Default::default()
        }),
        vec!["Dune", "emma", "100%_Pure"]
    );
    assert_eq!(
        titles(BookFilter {
            status: Some(ReadingStatus::Reading),
            sort: BookSort::Recent,
            ..Default::default()
        }),
        vec!["emma", "Dune"]
    );
    assert_eq!(
        titles(BookFilter {
            q: Some("herbert".to_string()),
            ..Default::default()
        }),
        vec!["Dune"]
    );
    // LIKE wildcards in the query are literal
    assert_eq!(
        titles(BookFilter {
            q: Some("%_".to_string()),
            ..Default::default()
        }),
        vec!["100%_Pure"]
    );
}

#[test]
fn db_progress_round_trips() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    let mut book = create_book(&db, "alice", "b1", "Dune");

    book.record_progress(
        &ProgressUpdate {
            current_page: Some(50),
            total_pages: Some(200),
            ..Default::default()
        },
        at(2024, 2, 1),
    );
    db.save_book(&book).unwrap();

    let stored = db.get_book("alice", "b1").unwrap().unwrap();
    assert_eq!(stored.progress, 25.0);
    assert_eq!(stored.status, ReadingStatus::Reading);
    assert_eq!(stored.current_page, Some(50));
    assert_eq!(stored.last_read_at, Some(at(2024, 2, 1)));

    book.record_progress(
        &ProgressUpdate {
            current_page: Some(200),
            ..Default::default()
        },
        at(2024, 2, 2),
    );
    db.save_book(&book).unwrap();

    let stored = db.get_book("alice", "b1").unwrap().unwrap();
    assert_eq!(stored.status, ReadingStatus::Read);
    assert_eq!(stored.finished_at, Some(at(2024, 2, 2)));
}

// ========== ANNOTATIONS ==========

#[test]
fn db_highlights_ordered_by_page_then_creation() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    create_book(&db, "alice", "b1", "Dune");

    db.save_highlight(&highlight("late", "alice", "b1", 10, at(2024, 1, 2)))
        .unwrap();
    db.save_highlight(&highlight("early", "alice", "b1", 5, at(2024, 1, 1)))
        .unwrap();
    db.save_highlight(&highlight("same-page", "alice", "b1", 10, at(2024, 1, 1)))
        .unwrap();

    let ids: Vec<String> = db
        .get_highlights("alice", "b1")
        .unwrap()
        .into_iter()
        .map(|h| h.id)
        .collect();
    assert_eq!(ids, vec!["early", "same-page", "late"]);
}

#[test]
fn db_bookmark_round_trips_location() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    create_book(&db, "alice", "b1", "Dune");

    let mut bm = bookmark("bm-1", "alice", "b1", 7);
    bm.note = Some("the spice".to_string());
    db.save_bookmark(&bm).unwrap();

    assert_eq!(db.get_bookmark("alice", "bm-1").unwrap().unwrap(), bm);
}

// ========== AUTH ==========

#[test]
fn auth_register_login_and_logout() {
    let db = test_db();
    let auth = auth(&db);

    let user = auth
        .register("alice", "correct horse", Some(" Alice ".to_string()))
        .unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Alice"));

    let (logged_in, token) = auth.login("alice", "correct horse").unwrap();
    assert_eq!(logged_in.id, user.id);
    assert_eq!(auth.authenticate(&token).unwrap().id, user.id);

    auth.logout(&token).unwrap();
    assert!(matches!(
        auth.authenticate(&token),
        Err(AppError::Unauthorized(_))
    ));
}

#[test]
fn auth_rejects_bad_credentials() {
    let db = test_db();
    let auth = auth(&db);
    auth.create_user("alice", "correct horse", "user").unwrap();

    assert!(matches!(
        auth.login("alice", "wrong horse"),
        Err(AppError::Unauthorized(_))
    ));
    assert!(matches!(
        auth.login("nobody", "correct horse"),
        Err(AppError::Unauthorized(_))
    ));
}

#[test]
fn auth_registration_disabled() {
    let db = test_db();
    let auth = AuthService::new(db, 30, false);
    assert!(matches!(
        auth.register("alice", "correct horse", None),
        Err(AppError::Forbidden(_))
    ));
    // admins can still create accounts
    assert!(auth.create_user("alice", "correct horse", "admin").is_ok());
}

#[test]
fn auth_invalid_username_rejected() {
    let db = test_db();
    let auth = auth(&db);
    assert!(auth.create_user("", "correct horse", "user").is_err());
    assert!(auth.create_user("bad name", "correct horse", "user").is_err());
    assert!(auth.create_user("alice", "correct horse", "root").is_err());
}

#[test]
fn auth_change_password() {
    let db = test_db();
    let auth = auth(&db);
    auth.create_user("alice", "correct horse", "user").unwrap();

    assert!(auth.change_password("alice", "battery staple").unwrap());
    assert!(auth.login("alice", "correct horse").is_err());
    assert!(auth.login("alice", "battery staple").is_ok());
    assert!(!auth.change_password("nobody", "battery staple").unwrap());
}

#[test]
fn auth_expired_session_rejected() {
    let db = test_db();
    let auth = auth(&db);
    let user = auth.create_user("alice", "correct horse", "user").unwrap();

    db.create_session(&crate::db::Session {
        token: "stale".to_string(),
        user_id: user.id,
        expires_at: now_timestamp() - 1,
    })
    .unwrap();

    assert!(auth.validate_token("stale").unwrap().is_none());
    // validation removed the stale row
    assert!(db.get_session("stale").unwrap().is_none());
}

#[test]
fn auth_delete_user_returns_files() {
    let db = test_db();
    let auth = auth(&db);
    let user = auth.create_user("alice", "correct horse", "user").unwrap();
    create_book(&db, &user.id, "b1", "Dune");

    let files = auth.delete_user("alice").unwrap().unwrap();
    assert_eq!(files, vec![("b1".to_string(), "b1.pdf".to_string())]);
    assert!(db.get_book(&user.id, "b1").unwrap().is_none());
    assert!(auth.delete_user("alice").unwrap().is_none());
}

#[test]
fn auth_download_links_expire() {
    let db = test_db();
    let auth = auth(&db);
    let user = auth.create_user("alice", "correct horse", "user").unwrap();
    create_book(&db, &user.id, "b1", "Dune");

    let link = auth.issue_download_link(&user.id, "b1", 15).unwrap();
    assert!(link.expires_at > now_timestamp());
    assert_eq!(auth.redeem_download_link(&link.token).unwrap().book_id, "b1");

    db.create_download_link(&DownloadLink {
        token: "old".to_string(),
        user_id: user.id.clone(),
        book_id: "b1".to_string(),
        expires_at: now_timestamp() - 60,
    })
    .unwrap();
    assert!(matches!(
        auth.redeem_download_link("old"),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        auth.redeem_download_link("never-issued"),
        Err(AppError::NotFound(_))
    ));

    // cleanup sweeps the expired link, not the live one
    assert_eq!(db.cleanup_expired_sessions().unwrap(), 1);
    assert!(db.get_download_link(&link.token).unwrap().is_some());
}

// ========== ANALYTICS ==========

fn new_session(
    book_id: &str,
    started_at: DateTime<Utc>,
    seconds: u64,
    start_page: u32,
    end_page: u32,
) -> NewSession {
    NewSession {
        book_id: book_id.to_string(),
        summary: SessionSummary {
            started_at,
            duration_seconds: seconds,
            start_page,
            end_page,
            pages_read: end_page.saturating_sub(start_page),
        },
    }
}

#[test]
fn analytics_session_requires_owned_book() {
    let db = test_db();
    setup_two_users(&db);
    let analytics = AnalyticsService::new(db);

    let result = analytics.log_session("bob", new_session("book-a", Utc::now(), 60, 1, 2));
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[test]
fn analytics_summary_totals_and_streak() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    create_book(&db, "alice", "b1", "Dune");
    let analytics = AnalyticsService::new(db);

    let now = Utc::now();
    analytics
        .log_session("alice", new_session("b1", now, 1200, 1, 11))
        .unwrap();
    analytics
        .log_session("alice", new_session("b1", now - Duration::days(1), 600, 11, 16))
        .unwrap();

    let summary = analytics.summary("alice", 7, now).unwrap();
    assert_eq!(summary.total_books, 1);
    assert_eq!(summary.books_by_status["unread"], 1);
    assert_eq!(summary.books_by_status["read"], 0);
    assert_eq!(summary.total_sessions, 2);
    assert_eq!(summary.total_minutes, 30);
    assert_eq!(summary.total_pages, 15);
    assert_eq!(summary.daily.len(), 7);
    assert_eq!(summary.daily[6].minutes, 20);
    assert_eq!(summary.daily[5].minutes, 10);
    assert_eq!(summary.streak.current, 2);
    assert_eq!(summary.streak.longest, 2);
}

#[test]
fn analytics_rejects_implausible_sessions() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    create_book(&db, "alice", "b1", "Dune");
    let analytics = AnalyticsService::new(db);

    let now = Utc::now();
    for _ in 0..2 {
        assert!(matches!(
            analytics.log_session("alice", new_session("b1", now, u64::MAX, 1, 2)),
            Err(AppError::InvalidFormat(_))
        ));
    }
    // past the book's 200 pages
    assert!(matches!(
        analytics.log_session("alice", new_session("b1", now, 600, 1, 500)),
        Err(AppError::InvalidFormat(_))
    ));
    analytics
        .log_session("alice", new_session("b1", now, 600, 1, 11))
        .unwrap();

    let summary = analytics.summary("alice", 7, now).unwrap();
    assert_eq!(summary.total_sessions, 1);
    assert_eq!(summary.total_minutes, 10);

    let minutes = analytics
        .create_goal(
            "alice",
            NewGoal {
                kind: GoalKind::Minutes,
                target: 60,
                period: GoalPeriod::Yearly,
            },
        )
        .unwrap();
    assert_eq!(minutes.current, 10);
}

#[test]
fn analytics_goal_progress() {
    let db = test_db();
    create_user(&db, "alice", "alice");
    let mut book = create_book(&db, "alice", "b1", "Dune");
    let analytics = AnalyticsService::new(db.clone());

    let pages = analytics
        .create_goal(
            "alice",
            NewGoal {
                kind: GoalKind::Pages,
                target: 100,
                period: GoalPeriod::Yearly,
            },
        )
        .unwrap();
    assert_eq!(pages.current, 0);

    analytics
        .log_session("alice", new_session("b1", Utc::now(), 3000, 1, 41))
        .unwrap();
    book.record_progress(
        &ProgressUpdate {
            current_page: Some(200),
            ..Default::default()
        },
        Utc::now(),
    );
    db.save_book(&book).unwrap();

    analytics
        .create_goal(
            "alice",
            NewGoal {
                kind: GoalKind::Books,
                target: 12,
                period: GoalPeriod::Yearly,
            },
        )
        .unwrap();

    let goals = analytics.goals("alice", Utc::now()).unwrap();
    assert_eq!(goals.len(), 2);
    assert_eq!(goals[0].current, 40);
    assert_eq!(goals[1].current, 1);

    let updated = analytics.update_goal("alice", &pages.id, 500).unwrap();
    assert_eq!(updated.target, 500);
    assert_eq!(updated.current, 40);

    assert!(analytics.update_goal("alice", &pages.id, 0).is_err());
    assert!(matches!(
        analytics.update_goal("bob", &pages.id, 5),
        Err(AppError::NotFound(_))
    ));

    analytics.delete_goal("alice", &pages.id).unwrap();
    assert!(matches!(
        analytics.delete_goal("alice", &pages.id),
        Err(AppError::NotFound(_))
    ));
}

// ========== ROUTER ==========

fn test_state(dir: &std::path::Path, requests: u32, max_upload_mb: u64) -> AppState {
    let mut config = Config::default();
    config.storage.books_dir = dir.join("books");
    config.cache.covers_dir = dir.join("covers");
    config.storage.max_upload_mb = max_upload_mb;
    config.rate_limit.requests = requests;
    config.rate_limit.window_seconds = 60;
    AppState::new(config, test_db())
}

fn request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let mut req = builder.body(Body::empty()).unwrap();
    let peer: SocketAddr = "10.0.0.9:4000".parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(peer));
    req
}

async fn send(app: &Router, req: Request<Body>) -> StatusCode {
    app.clone().oneshot(req).await.unwrap().status()
}

fn login(state: &AppState, username: &str) -> (String, String) {
    state.auth.create_user(username, "correct horse", "user").unwrap();
    let (user, token) = state.auth.login(username, "correct horse").unwrap();
    (user.id, token)
}

#[tokio::test]
async fn router_limits_clients_but_not_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_state(dir.path(), 2, 10));

    assert_eq!(send(&app, request(Method::GET, "/api/auth/me", None)).await, StatusCode::UNAUTHORIZED);
    assert_eq!(send(&app, request(Method::GET, "/api/auth/me", None)).await, StatusCode::UNAUTHORIZED);
    assert_eq!(
        send(&app, request(Method::GET, "/api/auth/me", None)).await,
        StatusCode::TOO_MANY_REQUESTS
    );

    // made-up tokens do not buy a fresh budget
    for i in 0..5 {
        let token = format!("forged{}", i);
        assert_eq!(
            send(&app, request(Method::POST, "/api/auth/login", Some(&token))).await,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    for _ in 0..5 {
        assert_eq!(send(&app, request(Method::GET, "/api/health", None)).await, StatusCode::OK);
    }
}

#[tokio::test]
async fn router_authenticated_users_get_their_own_budget() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), 1, 10);
    let (_, token) = login(&state, "alice");
    let app = create_router(state);

    assert_eq!(send(&app, request(Method::GET, "/api/auth/me", None)).await, StatusCode::UNAUTHORIZED);
    assert_eq!(send(&app, request(Method::GET, "/api/auth/me", Some(&token))).await, StatusCode::OK);
    assert_eq!(
        send(&app, request(Method::GET, "/api/auth/me", Some(&token))).await,
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn router_hides_other_users_books() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), 0, 10);
    let (alice_id, alice) = login(&state, "alice");
    let (_, bob) = login(&state, "bob");
    create_book(&state.db, &alice_id, "book-a", "Dune");
    let app = create_router(state);

    let res = app
        .clone()
        .oneshot(request(Method::GET, "/api/books", Some(&alice)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let books: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(books.as_array().map(Vec::len), Some(1));

    assert_eq!(send(&app, request(Method::GET, "/api/books", Some(&bob))).await, StatusCode::OK);
    assert_eq!(send(&app, request(Method::GET, "/api/books/book-a", Some(&alice))).await, StatusCode::OK);
    for method in [Method::GET, Method::DELETE] {
        assert_eq!(
            send(&app, request(method, "/api/books/book-a", Some(&bob))).await,
            StatusCode::NOT_FOUND
        );
    }
    assert_eq!(
        send(&app, request(Method::GET, "/api/books/book-a/download-url", Some(&bob))).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(send(&app, request(Method::GET, "/api/books/book-a", Some(&alice))).await, StatusCode::OK);
}

fn upload_request(token: &str, filename: &str, data: &[u8]) -> Request<Body> {
    let boundary = "readshelf-boundary";
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n",
        b = boundary,
        f = filename
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    let mut req = Request::builder()
        .method(Method::POST)
        .uri("/api/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    let peer: SocketAddr = "10.0.0.9:4000".parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(peer));
    req
}

#[tokio::test]
async fn router_rejects_oversized_upload() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), 0, 1);
    let (_, token) = login(&state, "alice");
    let app = create_router(state);

    let data = vec![b'a'; 2 * 1024 * 1024];
    assert_eq!(
        send(&app, upload_request(&token, "big.txt", &data)).await,
        StatusCode::PAYLOAD_TOO_LARGE
    );
}

#[tokio::test]
async fn router_unreadable_upload_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), 0, 10);
    state.storage.ensure_dirs().await.unwrap();
    let (alice_id, token) = login(&state, "alice");
    let db = state.db.clone();
    let app = create_router(state);

    assert_eq!(
        send(&app, upload_request(&token, "broken.pdf", b"%PDF-1.7 not really")).await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(std::fs::read_dir(dir.path().join("books")).unwrap().count(), 0);
    assert!(db.list_books(&alice_id, &BookFilter::default()).unwrap().is_empty());
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"
public_url = "https://books.example.org"

[database]
path = "/tmp/test.db"

[auth]
registration = "disabled"
session_days = 7

[storage]
books_dir = "/srv/books"
max_upload_mb = 5

[rate_limit]
requests = 10
window_seconds = 60
trust_forwarded_for = true
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.server.public_url, "https://books.example.org");
    assert!(!config.auth.registration_enabled());
    assert_eq!(config.auth.session_days, 7);
    assert_eq!(config.storage.max_upload_bytes(), 5 * 1024 * 1024);
    assert_eq!(config.storage.download_link_minutes, 15);
    assert_eq!(config.rate_limit.requests, 10);
    assert!(config.rate_limit.trust_forwarded_for);
    assert_eq!(config.cache.thumbnail_size, 200);
}

#[test]
fn config_default_file_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.server.bind.port(), 8080);
    assert!(config.auth.registration_enabled());
    assert_eq!(config.rate_limit.window_seconds, 900);
    assert!(!config.rate_limit.trust_forwarded_for);
}

#[test]
fn book_format_from_filename() {
    assert_eq!(BookFormat::from_filename("Dune.EPUB"), Some(BookFormat::Epub));
    assert_eq!(BookFormat::from_filename("notes.txt"), Some(BookFormat::Txt));
    assert_eq!(BookFormat::from_filename("paper.pdf"), Some(BookFormat::Pdf));
    assert_eq!(BookFormat::from_filename("comic.cbz"), None);
    assert_eq!(BookFormat::Epub.mime_type(), "application/epub+zip");
}
