use std::collections::BTreeMap;

use axum::{
	async_trait,
	extract::{rejection::FormRejection, FromRequestParts, Path, Query, State},
	http::{request::Parts, StatusCode},
	routing::{get, post},
	Form, Json, Router,
};
use maud::{html, Markup, DOCTYPE};
use tower_cookies::{CookieManagerLayer, Cookies};
use tower_http::trace::TraceLayer;

use crate::accounts;
use crate::error::{LibraryError, Result};
use crate::library::SharedState;
use crate::types::{
	Account, ApproveForm, Bid, Book, BookRequest, BookUpdate, DeleteParams, NewBook, NewSection,
	RequestEntry, Rid, SearchParams, Section, SectionUpdate, Sid, StatusFilter, Uid,
};

/// Cookie holding the authenticated account id, set by the login service.
pub const USER_COOKIE: &str = "uid";

pub fn router(state: SharedState) -> Router {
	Router::new()
		.route("/", get(display_catalog))
		.route("/sections", get(list_sections).post(create_section))
		.route(
			"/sections/:id",
			get(get_section).put(update_section).delete(delete_section),
		)
		.route("/sections/:id/books", get(section_books))
		.route("/books", get(search_books).post(create_book))
		.route("/books/:id", get(get_book).put(update_book).delete(delete_book))
		.route("/books/:id/request", post(request_book))
		.route("/books/:id/requests", get(book_requests))
		.route("/requests", get(list_requests))
		.route("/requests/:id/approve", post(approve_request))
		.route("/requests/:id/return", post(return_book))
		.route("/requests/:id/revoke", post(revoke_request))
		.route("/users/:id/books", get(user_books))
		.layer(CookieManagerLayer::new())
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

/// The account behind the `uid` cookie. Resolving it counts as activity.
pub struct CurrentUser(pub Account);

#[async_trait]
impl FromRequestParts<SharedState> for CurrentUser {
	type Rejection = LibraryError;

	async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self> {
		let cookies = Cookies::from_request_parts(parts, state)
			.await
			.map_err(|_| LibraryError::Unauthenticated)?;
		let uid: Uid = cookies
			.get(USER_COOKIE)
			.and_then(|cookie| cookie.value().parse().ok())
			.ok_or(LibraryError::Unauthenticated)?;
		let account = accounts::get(&state.db, uid)
			.await?
			.ok_or(LibraryError::Unauthenticated)?;
		accounts::touch(&state.db, uid, state.clock.now()).await?;
		Ok(CurrentUser(account))
	}
}

async fn display_catalog(State(lib): State<SharedState>) -> Result<Markup> {
	let sections = lib.sections().await?;
	let mut shelves: BTreeMap<Sid, Vec<Book>> = BTreeMap::new();
	for book in lib.search(&SearchParams::default()).await? {
		shelves.entry(book.section_id).or_default().push(book);
	}

	Ok(html! {
		(DOCTYPE)
		html { body {
			@for section in &sections {
				h2 { (section.name) }
				@if !section.description.is_empty() {
					p { (section.description) }
				}
				table {
					thead{ tr {
						td { "Title" }
						td { "Author" }
					} }
					tbody{
						@for book in shelves.get(&section.id).into_iter().flatten() {
							tr{
								td { (book.title) }
								td { (book.author) }
							}
						}
					}
				}
			}
		} }
	})
}

async fn list_sections(State(lib): State<SharedState>) -> Result<Json<Vec<Section>>> {
	Ok(Json(lib.sections().await?))
}

async fn create_section(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Form(form): Form<NewSection>,
) -> Result<(StatusCode, Json<Section>)> {
	let section = lib.create_section(&actor, form).await?;
	Ok((StatusCode::CREATED, Json(section)))
}

async fn get_section(
	State(lib): State<SharedState>,
	Path(sid): Path<Sid>,
) -> Result<Json<Section>> {
	Ok(Json(lib.section(sid).await?))
}

async fn update_section(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(sid): Path<Sid>,
	Form(form): Form<SectionUpdate>,
) -> Result<Json<Section>> {
	Ok(Json(lib.update_section(&actor, sid, form).await?))
}

async fn delete_section(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(sid): Path<Sid>,
	Query(params): Query<DeleteParams>,
) -> Result<StatusCode> {
	lib.delete_section(&actor, sid, params.cascade).await?;
	Ok(StatusCode::NO_CONTENT)
}

async fn section_books(
	State(lib): State<SharedState>,
	Path(sid): Path<Sid>,
) -> Result<Json<Vec<Book>>> {
	Ok(Json(lib.books_in_section(sid).await?))
}

async fn search_books(
	State(lib): State<SharedState>,
	Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Book>>> {
	Ok(Json(lib.search(&params).await?))
}

async fn create_book(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Form(form): Form<NewBook>,
) -> Result<(StatusCode, Json<Book>)> {
	let book = lib.create_book(&actor, form).await?;
	Ok((StatusCode::CREATED, Json(book)))
}

async fn get_book(State(lib): State<SharedState>, Path(bid): Path<Bid>) -> Result<Json<Book>> {
	Ok(Json(lib.book(bid).await?))
}

async fn update_book(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(bid): Path<Bid>,
	Form(form): Form<BookUpdate>,
) -> Result<Json<Book>> {
	Ok(Json(lib.update_book(&actor, bid, form).await?))
}

async fn delete_book(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(bid): Path<Bid>,
) -> Result<StatusCode> {
	lib.delete_book(&actor, bid).await?;
	Ok(StatusCode::NO_CONTENT)
}

async fn request_book(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(bid): Path<Bid>,
) -> Result<(StatusCode, Json<BookRequest>)> {
	let row = lib.request(&actor, bid).await?;
	Ok((StatusCode::CREATED, Json(row)))
}

async fn book_requests(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(bid): Path<Bid>,
) -> Result<Json<Vec<BookRequest>>> {
	Ok(Json(lib.requests_for_book(&actor, bid).await?))
}

async fn list_requests(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Query(filter): Query<StatusFilter>,
) -> Result<Json<Vec<RequestEntry>>> {
	Ok(Json(lib.requests(&actor, filter.status).await?))
}

// a POST without a form body approves for the default period
async fn approve_request(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(rid): Path<Rid>,
	form: std::result::Result<Form<ApproveForm>, FormRejection>,
) -> Result<Json<BookRequest>> {
	let due_in_days = match form {
		Ok(Form(form)) => form.due_in_days,
		Err(FormRejection::InvalidFormContentType(_)) => None,
		Err(rejection) => return Err(LibraryError::invalid(rejection.body_text())),
	};
	Ok(Json(lib.approve(&actor, rid, due_in_days).await?))
}

async fn return_book(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(rid): Path<Rid>,
) -> Result<Json<BookRequest>> {
	Ok(Json(lib.return_book(&actor, rid).await?))
}

async fn revoke_request(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(rid): Path<Rid>,
) -> Result<Json<BookRequest>> {
	Ok(Json(lib.revoke(&actor, rid).await?))
}

async fn user_books(
	State(lib): State<SharedState>,
	CurrentUser(actor): CurrentUser,
	Path(uid): Path<Uid>,
) -> Result<Json<Vec<RequestEntry>>> {
	Ok(Json(lib.user_books(&actor, uid).await?))
}
