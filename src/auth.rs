//! Role checks, called at the start of every operation that has an actor.

use crate::error::{LibraryError, Result};
use crate::types::{Account, Role, Uid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	ManageCatalog,
	RequestBook,
	ApproveRequest,
	RevokeRequest,
	ReturnBook,
	ViewLedger,
	ViewUserBooks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
	Catalog,
	Ledger,
	/// a ledger row, identified by the user who owns it
	Request { owner: Uid },
	User(Uid),
}

pub fn authorize(actor: &Account, action: Action, resource: Resource) -> Result<()> {
	let allowed = match (action, resource) {
		(Action::ManageCatalog, _)
		| (Action::ApproveRequest, _)
		| (Action::RevokeRequest, _)
		| (Action::ViewLedger, _) => actor.role == Role::Librarian,
		(Action::RequestBook, _) => actor.role == Role::Student,
		(Action::ReturnBook, Resource::Request { owner })
		| (Action::ViewUserBooks, Resource::User(owner)) => {
			actor.id == owner || actor.role == Role::Librarian
		}
		(Action::ReturnBook, _) | (Action::ViewUserBooks, _) => false,
	};

	if allowed {
		Ok(())
	} else {
		Err(LibraryError::forbidden(format!(
			"{} {} may not {:?} on {:?}",
			actor.role.as_str(),
			actor.id,
			action,
			resource
		)))
	}
}
