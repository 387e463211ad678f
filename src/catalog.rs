//! Sections and books.
//!
//! Reads are open to everyone; every write checks
//! [`Action::ManageCatalog`](crate::auth::Action::ManageCatalog) first.

use sqlx::SqlitePool;

use crate::auth::{authorize, Action, Resource};
use crate::error::{is_unique_violation, LibraryError, Result};
use crate::library::Library;
use crate::types::{
	Account, Bid, Book, BookUpdate, NewBook, NewSection, SearchField, SearchParams, Section,
	SectionUpdate, Sid, SortKey,
};

const SECTION_COLUMNS: &str = "id, name, description, created_at";
const BOOK_COLUMNS: &str = "b.id, b.section_id, b.title, b.author, b.content, b.created_at";

fn required(field: &str, value: &str) -> Result<String> {
	let value = value.trim();
	if value.is_empty() {
		return Err(LibraryError::invalid(format!("{field} must not be blank")));
	}
	Ok(value.to_string())
}

/// Case-insensitive containment. `needle` is already lowercased.
///
/// SQLite's LIKE and NOCASE only fold ASCII, so folding happens here.
fn contains_folded(haystack: &str, needle: &str) -> bool {
	haystack.to_lowercase().contains(needle)
}

#[derive(sqlx::FromRow)]
struct ShelvedBook {
	#[sqlx(flatten)]
	book: Book,
	section: String,
}

/// Number of pending or approved requests referencing `book`.
async fn open_requests(db: &SqlitePool, book: Bid) -> Result<i64> {
	let (count,): (i64,) = sqlx::query_as(
		"SELECT COUNT(*) FROM book_requests
		WHERE book_id = ? AND status IN ('pending', 'approved')",
	)
	.bind(book)
	.fetch_one(db)
	.await?;
	Ok(count)
}

impl Library {
	pub async fn create_section(&self, actor: &Account, form: NewSection) -> Result<Section> {
		authorize(actor, Action::ManageCatalog, Resource::Catalog)?;
		let name = required("section name", &form.name)?;

		let section = sqlx::query_as::<_, Section>(&format!(
			"INSERT INTO sections (name, description, created_at) VALUES (?, ?, ?)
			RETURNING {SECTION_COLUMNS}"
		))
		.bind(&name)
		.bind(form.description.trim())
		.bind(self.clock.now())
		.fetch_one(&self.db)
		.await
		.map_err(|err| {
			if is_unique_violation(&err) {
				LibraryError::conflict(format!("section {name:?} already exists"))
			} else {
				err.into()
			}
		})?;

		tracing::info!(sid = section.id, name = %section.name, "section created");
		Ok(section)
	}

	pub async fn update_section(
		&self,
		actor: &Account,
		sid: Sid,
		form: SectionUpdate,
	) -> Result<Section> {
		authorize(actor, Action::ManageCatalog, Resource::Catalog)?;
		let current = self.section(sid).await?;

		let name = match form.name {
			Some(name) => required("section name", &name)?,
			None => current.name,
		};
		let description = form
			.description
			.map(|d| d.trim().to_string())
			.unwrap_or(current.description);

		let section = sqlx::query_as::<_, Section>(&format!(
			"UPDATE sections SET name = ?, description = ? WHERE id = ? RETURNING {SECTION_COLUMNS}"
		))
		.bind(&name)
		.bind(&description)
		.bind(sid)
		.fetch_optional(&self.db)
		.await
		.map_err(|err| {
			if is_unique_violation(&err) {
				LibraryError::conflict(format!("section {name:?} already exists"))
			} else {
				err.into()
			}
		})?
		.ok_or_else(|| LibraryError::not_found("section", sid))?;

		Ok(section)
	}

	/// Deletes a section. With books still in it this is a `Conflict` unless
	/// `cascade` is set; cascading never removes a book that has open requests.
	pub async fn delete_section(&self, actor: &Account, sid: Sid, cascade: bool) -> Result<()> {
		authorize(actor, Action::ManageCatalog, Resource::Catalog)?;
		self.section(sid).await?;

		let mut tx = self.db.begin().await?;

		let (books,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM books WHERE section_id = ?")
			.bind(sid)
			.fetch_one(&mut *tx)
			.await?;
		if books > 0 && !cascade {
			return Err(LibraryError::conflict(format!(
				"section {sid} still holds {books} books"
			)));
		}

		let (open,): (i64,) = sqlx::query_as(
			"SELECT COUNT(*) FROM book_requests r JOIN books b ON b.id = r.book_id
			WHERE b.section_id = ? AND r.status IN ('pending', 'approved')",
		)
		.bind(sid)
		.fetch_one(&mut *tx)
		.await?;
		if open > 0 {
			return Err(LibraryError::conflict(format!(
				"section {sid} has books with {open} open requests"
			)));
		}

		sqlx::query("DELETE FROM books WHERE section_id = ?")
			.bind(sid)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM sections WHERE id = ?")
			.bind(sid)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;

		tracing::info!(sid, books, cascade, "section deleted");
		Ok(())
	}

	pub async fn section(&self, sid: Sid) -> Result<Section> {
		sqlx::query_as::<_, Section>(&format!(
			"SELECT {SECTION_COLUMNS} FROM sections WHERE id = ?"
		))
		.bind(sid)
		.fetch_optional(&self.db)
		.await?
		.ok_or_else(|| LibraryError::not_found("section", sid))
	}

	pub async fn sections(&self) -> Result<Vec<Section>> {
		let sections = sqlx::query_as::<_, Section>(&format!(
			"SELECT {SECTION_COLUMNS} FROM sections ORDER BY id"
		))
		.fetch_all(&self.db)
		.await?;
		Ok(sections)
	}

	pub async fn create_book(&self, actor: &Account, form: NewBook) -> Result<Book> {
		authorize(actor, Action::ManageCatalog, Resource::Catalog)?;
		let title = required("title", &form.title)?;
		let author = required("author", &form.author)?;
		self.section(form.section_id).await?;

		let book = sqlx::query_as::<_, Book>(
			"INSERT INTO books (section_id, title, author, content, created_at)
			VALUES (?, ?, ?, ?, ?) RETURNING id, section_id, title, author, content, created_at",
		)
		.bind(form.section_id)
		.bind(&title)
		.bind(&author)
		.bind(form.content.trim())
		.bind(self.clock.now())
		.fetch_one(&self.db)
		.await?;

		tracing::info!(bid = book.id, sid = book.section_id, title = %book.title, "book created");
		Ok(book)
	}

	pub async fn update_book(&self, actor: &Account, bid: Bid, form: BookUpdate) -> Result<Book> {
		authorize(actor, Action::ManageCatalog, Resource::Catalog)?;
		let current = self.book(bid).await?;

		let section_id = match form.section_id {
			Some(sid) if sid != current.section_id => self.section(sid).await?.id,
			_ => current.section_id,
		};
		let title = match form.title {
			Some(title) => required("title", &title)?,
			None => current.title,
		};
		let author = match form.author {
			Some(author) => required("author", &author)?,
			None => current.author,
		};
		let content = form.content.map(|c| c.trim().to_string()).unwrap_or(current.content);

		sqlx::query_as::<_, Book>(
			"UPDATE books SET section_id = ?, title = ?, author = ?, content = ? WHERE id = ?
			RETURNING id, section_id, title, author, content, created_at",
		)
		.bind(section_id)
		.bind(&title)
		.bind(&author)
		.bind(&content)
		.bind(bid)
		.fetch_optional(&self.db)
		.await?
		.ok_or_else(|| LibraryError::not_found("book", bid))
	}

	/// Removes a book from the catalog. Its ledger history stays.
	pub async fn delete_book(&self, actor: &Account, bid: Bid) -> Result<()> {
		authorize(actor, Action::ManageCatalog, Resource::Catalog)?;
		self.book(bid).await?;

		let open = open_requests(&self.db, bid).await?;
		if open > 0 {
			return Err(LibraryError::conflict(format!(
				"book {bid} has {open} open requests"
			)));
		}

		// the status guard closes the gap between the count and the delete
		let deleted = sqlx::query(
			"DELETE FROM books WHERE id = ? AND NOT EXISTS (
				SELECT 1 FROM book_requests WHERE book_id = ? AND status IN ('pending', 'approved')
			)",
		)
		.bind(bid)
		.bind(bid)
		.execute(&self.db)
		.await?
		.rows_affected();
		if deleted == 0 {
			return Err(LibraryError::conflict(format!("book {bid} was requested meanwhile")));
		}

		tracing::info!(bid, "book deleted");
		Ok(())
	}

	pub async fn book(&self, bid: Bid) -> Result<Book> {
		sqlx::query_as::<_, Book>(&format!("SELECT {BOOK_COLUMNS} FROM books b WHERE b.id = ?"))
			.bind(bid)
			.fetch_optional(&self.db)
			.await?
			.ok_or_else(|| LibraryError::not_found("book", bid))
	}

	pub async fn books_in_section(&self, sid: Sid) -> Result<Vec<Book>> {
		self.section(sid).await?;
		let books = sqlx::query_as::<_, Book>(&format!(
			"SELECT {BOOK_COLUMNS} FROM books b WHERE b.section_id = ? ORDER BY b.id"
		))
		.bind(sid)
		.fetch_all(&self.db)
		.await?;
		Ok(books)
	}

	/// Case-insensitive substring search over title, author and section name.
	/// A missing or blank term lists the whole catalog.
	pub async fn search(&self, params: &SearchParams) -> Result<Vec<Book>> {
		let needle = params.q.as_deref().map(str::trim).unwrap_or_default().to_lowercase();

		let shelved = sqlx::query_as::<_, ShelvedBook>(&format!(
			"SELECT {BOOK_COLUMNS}, s.name AS section
			FROM books b JOIN sections s ON s.id = b.section_id ORDER BY b.id"
		))
		.fetch_all(&self.db)
		.await?;

		let mut books: Vec<Book> = shelved
			.into_iter()
			.filter(|row| {
				let book = &row.book;
				match params.field {
					SearchField::Any => {
						contains_folded(&book.title, &needle)
							|| contains_folded(&book.author, &needle)
							|| contains_folded(&row.section, &needle)
					}
					SearchField::Title => contains_folded(&book.title, &needle),
					SearchField::Author => contains_folded(&book.author, &needle),
					SearchField::Section => contains_folded(&row.section, &needle),
				}
			})
			.map(|row| row.book)
			.collect();

		// stable sort: ties keep insertion order
		match params.sort {
			SortKey::Inserted => {}
			SortKey::Title => books.sort_by_cached_key(|b| b.title.to_lowercase()),
			SortKey::Author => books.sort_by_cached_key(|b| b.author.to_lowercase()),
		}
		Ok(books)
	}
}
