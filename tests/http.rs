use std::sync::Arc;
use std::time::Duration;

use axum::{
	body::Body,
	http::{header, Method, Request, StatusCode},
	Router,
};
use chrono::{TimeZone, Utc};
use elib::{
	accounts,
	cache::RequestCache,
	clock::ManualClock,
	config::IssuePolicy,
	routes, sql,
	types::{Account, Uid},
	Library, SharedState,
};
use serde_json::Value;
use tower::ServiceExt;

struct App {
	router: Router,
	state: SharedState,
	clock: Arc<ManualClock>,
	librarian: Account,
	alice: Account,
	bob: Account,
}

async fn app() -> App {
	let start = Utc.with_ymd_and_hms(2024, 9, 2, 8, 30, 0).unwrap();
	let clock = Arc::new(ManualClock::new(start));
	let db = sql::connect_memory().await.unwrap();
	let librarian = accounts::seed_librarian(&db, "Lib", "lib@x", start).await.unwrap();
	let alice = accounts::create_student(&db, "Alice", "alice@x", start).await.unwrap();
	let bob = accounts::create_student(&db, "Bob", "bob@x", start).await.unwrap();
	let state = Library::new(
		db,
		clock.clone(),
		RequestCache::new(Duration::from_secs(60)),
		IssuePolicy::default(),
	)
	.shared();

	App {
		router: routes::router(state.clone()),
		state,
		clock,
		librarian,
		alice,
		bob,
	}
}

type Reply = (StatusCode, Value);

impl App {
	async fn send(&self, method: Method, uri: &str, uid: Option<Uid>, form: Option<&str>) -> Reply {
		let mut request = Request::builder().method(method).uri(uri);
		if let Some(uid) = uid {
			request = request.header(header::COOKIE, format!("uid={uid}"));
		}
		let body = match form {
			Some(form) => {
				request =
					request.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
				Body::from(form.to_string())
			}
			None => Body::empty(),
		};

		let response = self.router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
		let status = response.status();
		let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
		(status, json)
	}

	async fn get(&self, uri: &str, uid: Option<Uid>) -> Reply {
		self.send(Method::GET, uri, uid, None).await
	}

	async fn post(&self, uri: &str, uid: Option<Uid>) -> Reply {
		self.send(Method::POST, uri, uid, None).await
	}

	async fn post_form(&self, uri: &str, uid: Option<Uid>, form: &str) -> Reply {
		self.send(Method::POST, uri, uid, Some(form)).await
	}

	async fn delete(&self, uri: &str, uid: Option<Uid>) -> Reply {
		self.send(Method::DELETE, uri, uid, None).await
	}

	async fn shelf_with_books(&self, count: usize) -> Vec<i64> {
		let lib = Some(self.librarian.id);
		let (status, section) =
			self.post_form("/sections", lib, "name=Fiction&description=novels").await;
		assert_eq!(status, StatusCode::CREATED);
		let sid = section["id"].as_i64().unwrap();

		let mut books = Vec::new();
		for n in 0..count {
			let form = format!("section_id={sid}&title=Novel+{n}&author=Writer+{n}");
			let (status, book) = self.post_form("/books", lib, &form).await;
			assert_eq!(status, StatusCode::CREATED);
			books.push(book["id"].as_i64().unwrap());
		}
		books
	}

	/// Requests `book` as `student` and returns the request id.
	async fn request(&self, student: &Account, book: i64) -> i64 {
		let (status, row) = self.post(&format!("/books/{book}/request"), Some(student.id)).await;
		assert_eq!(status, StatusCode::CREATED);
		row["id"].as_i64().unwrap()
	}
}

#[tokio::test]
async fn request_approve_return_flow() {
	let app = app().await;
	let books = app.shelf_with_books(1).await;
	let alice = Some(app.alice.id);
	let lib = Some(app.librarian.id);

	let (status, row) = app.post(&format!("/books/{}/request", books[0]), alice).await;
	assert_eq!(status, StatusCode::CREATED);
	assert_eq!(row["status"], "pending");
	let rid = row["id"].as_i64().unwrap();

	let (status, err) = app.post(&format!("/books/{}/request", books[0]), alice).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(err["error"], "duplicate_pending");

	let (status, row) =
		app.post_form(&format!("/requests/{rid}/approve"), lib, "due_in_days=14").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(row["status"], "approved");
	assert!(row["due_date"].as_str().unwrap().starts_with("2024-09-16"));

	let (status, listed) = app.get(&format!("/users/{}/books", app.alice.id), alice).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(listed[0]["status"], "approved");
	assert_eq!(listed[0]["title"], "Novel 0");

	let return_uri = format!("/requests/{rid}/return");
	let (status, err) = app.post(&return_uri, Some(app.bob.id)).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(err["error"], "forbidden");

	let (status, row) = app.post(&return_uri, alice).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(row["status"], "returned");
	assert!(row["returned_at"].is_string());

	let (status, err) = app.post(&return_uri, alice).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(err["error"], "invalid_state");
}

#[tokio::test]
async fn malformed_approval_form_is_rejected() {
	let app = app().await;
	let books = app.shelf_with_books(1).await;
	let lib = Some(app.librarian.id);
	let rid = app.request(&app.alice, books[0]).await;
	let approve = format!("/requests/{rid}/approve");

	for form in ["due_in_days=abc", "due_in_days=7.5"] {
		let (status, err) = app.post_form(&approve, lib, form).await;
		assert_eq!(status, StatusCode::BAD_REQUEST, "form {form:?}");
		assert_eq!(err["error"], "invalid");
	}

	let (status, err) = app.post_form(&approve, lib, "due_in_days=0").await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(err["error"], "invalid");

	let (_, pending) = app.get("/requests?status=pending", lib).await;
	assert_eq!(pending.as_array().unwrap().len(), 1);

	// an empty form body still means the default period
	let (status, row) = app.post_form(&approve, lib, "").await;
	assert_eq!(status, StatusCode::OK);
	assert!(row["due_date"].as_str().unwrap().starts_with("2024-09-09"));
}

#[tokio::test]
async fn sixth_approval_hits_the_limit_until_a_return() {
	let app = app().await;
	let books = app.shelf_with_books(6).await;
	let alice = Some(app.alice.id);
	let lib = Some(app.librarian.id);

	let mut rids = Vec::new();
	for bid in &books {
		rids.push(app.request(&app.alice, *bid).await);
	}
	for rid in &rids[..5] {
		let (status, _) = app.post(&format!("/requests/{rid}/approve"), lib).await;
		assert_eq!(status, StatusCode::OK);
	}

	let sixth = format!("/requests/{}/approve", rids[5]);
	let (status, err) = app.post(&sixth, lib).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(err["error"], "limit_exceeded");

	let (status, _) = app.post(&format!("/requests/{}/return", rids[0]), alice).await;
	assert_eq!(status, StatusCode::OK);
	let (status, row) = app.post(&sixth, lib).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(row["status"], "approved");

	let (status, approved) = app.get("/requests?status=approved", lib).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(approved.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn revoked_request_cannot_be_returned() {
	let app = app().await;
	let books = app.shelf_with_books(1).await;
	let alice = Some(app.alice.id);

	let rid = app.request(&app.alice, books[0]).await;
	let (status, _) = app
		.post_form(&format!("/requests/{rid}/approve"), Some(app.librarian.id), "due_in_days=1")
		.await;
	assert_eq!(status, StatusCode::OK);

	app.clock.advance(chrono::Duration::days(2));
	let report = app.state.revoke_overdue().await.unwrap();
	assert_eq!(report.revoked, 1);
	assert_eq!(app.state.revoke_overdue().await.unwrap().revoked, 0);

	let (status, err) = app.post(&format!("/requests/{rid}/return"), alice).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(err["error"], "invalid_state");

	let (_, listed) = app.get(&format!("/users/{}/books", app.alice.id), alice).await;
	assert_eq!(listed[0]["status"], "revoked");
}

#[tokio::test]
async fn actors_and_roles_are_enforced() {
	let app = app().await;

	let (status, err) = app.post_form("/sections", None, "name=X").await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(err["error"], "unauthenticated");

	let (status, _) = app.post_form("/sections", Some(9999), "name=X").await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, err) = app.post_form("/sections", Some(app.alice.id), "name=X").await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(err["error"], "forbidden");

	let (status, err) = app.post("/requests/77/approve", Some(app.librarian.id)).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(err["error"], "not_found");

	let (status, _) = app.get(&format!("/users/{}/books", app.alice.id), Some(app.bob.id)).await;
	assert_eq!(status, StatusCode::FORBIDDEN);

	// activity is recorded for the resolved actor
	let alice = accounts::require(&app.state.db, app.alice.id).await.unwrap();
	assert!(alice.last_activity.is_some());
}

#[tokio::test]
async fn catalog_endpoints() {
	let app = app().await;
	let books = app.shelf_with_books(2).await;
	let lib = Some(app.librarian.id);

	let (status, found) = app.get("/books?q=novel+1&field=title", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(found.as_array().unwrap().len(), 1);
	assert_eq!(found[0]["author"], "Writer 1");

	let (status, found) = app.get("/books?q=FICTION&field=section&sort=title", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(found.as_array().unwrap().len(), 2);

	let (status, book) = app
		.send(Method::PUT, &format!("/books/{}", books[0]), lib, Some("title=Renamed"))
		.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(book["title"], "Renamed");
	assert_eq!(book["author"], "Writer 0");

	let sid = book["section_id"].as_i64().unwrap();
	let (status, err) = app.delete(&format!("/sections/{sid}"), lib).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(err["error"], "conflict");

	let (status, _) = app.delete(&format!("/books/{}", books[1]), lib).await;
	assert_eq!(status, StatusCode::NO_CONTENT);
	let (status, _) = app.get(&format!("/books/{}", books[1]), None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);

	let (status, _) = app.delete(&format!("/sections/{sid}?cascade=true"), lib).await;
	assert_eq!(status, StatusCode::NO_CONTENT);
	let (status, sections) = app.get("/sections", None).await;
	assert_eq!(status, StatusCode::OK);
	assert!(sections.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn catalog_page_renders_books() {
	let app = app().await;
	app.shelf_with_books(1).await;

	let response = app
		.router
		.clone()
		.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
	let page = String::from_utf8(bytes.to_vec()).unwrap();
	assert!(page.contains("Fiction"));
	assert!(page.contains("Novel 0"));
}
