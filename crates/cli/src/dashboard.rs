//! Local view of the caller's books.
//!
//! Holds the last fetched list and the selected filter. Reads that fail are
//! logged and leave the previous list in place; writes surface their error.

use shelf_app::books::models::{Book, BookRequest, BookStatus, StatusFilter};
use uuid::Uuid;

use crate::client::{BooksApi, ClientError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub reading: usize,
    pub completed: usize,
    pub wishlist: usize,
    pub total: usize,
}

pub struct Dashboard<A> {
    api: A,
    owner: Option<Uuid>,
    filter: StatusFilter,
    books: Vec<Book>,
}

impl<A: BooksApi> Dashboard<A> {
    /// `owner`, when known, drops any row not owned by the session user.
    pub fn new(api: A, owner: Option<Uuid>, filter: StatusFilter) -> Self {
        Self {
            api,
            owner,
            filter,
            books: Vec::new(),
        }
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn filter(&self) -> StatusFilter {
        self.filter
    }

    /// Refetch with the current filter. Returns whether the fetch succeeded.
    pub async fn refresh(&mut self) -> bool {
        match self.api.list(self.filter).await {
            Ok(books) => {
                self.books = books
                    .into_iter()
                    .filter(|b| self.owner.map_or(true, |owner| b.user_id == owner))
                    .collect();
                true
            }
            Err(e) => {
                tracing::error!(error = %e, filter = %self.filter, "failed to fetch books");
                false
            }
        }
    }

    pub async fn set_filter(&mut self, filter: StatusFilter) -> bool {
        self.filter = filter;
        self.refresh().await
    }

    pub async fn add(
        &mut self,
        title: &str,
        author: &str,
        status: BookStatus,
    ) -> Result<&Book, ClientError> {
        let request = BookRequest {
            title: Some(title.to_string()),
            author: Some(author.to_string()),
            status: Some(status.to_string()),
        };
        let book = self.api.create(&request).await?;
        self.books.insert(0, book);
        Ok(&self.books[0])
    }

    pub async fn remove(&mut self, id: Uuid) -> Result<(), ClientError> {
        self.api.delete(id).await?;
        self.books.retain(|b| b.id != id);
        Ok(())
    }

    pub async fn set_status(&mut self, id: Uuid, status: BookStatus) -> Result<Book, ClientError> {
        let updated = self.api.set_status(id, status).await?;
        self.replace(&updated);
        Ok(updated)
    }

    pub async fn edit(
        &mut self,
        id: Uuid,
        title: &str,
        author: &str,
        status: BookStatus,
    ) -> Result<Book, ClientError> {
        let request = BookRequest {
            title: Some(title.to_string()),
            author: Some(author.to_string()),
            status: Some(status.to_string()),
        };
        let updated = self.api.update(id, &request).await?;
        self.replace(&updated);
        Ok(updated)
    }

    fn replace(&mut self, updated: &Book) {
        if let Some(slot) = self.books.iter_mut().find(|b| b.id == updated.id) {
            *slot = updated.clone();
        }
    }

    /// Books whose title contains `search`, ignoring case.
    pub fn visible(&self, search: &str) -> Vec<&Book> {
        let needle = search.to_lowercase();
        self.books
            .iter()
            .filter(|b| b.title.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn stats(&self) -> Stats {
        let count = |status: BookStatus| self.books.iter().filter(|b| b.status == status).count();
        Stats {
            reading: count(BookStatus::Reading),
            completed: count(BookStatus::Completed),
            wishlist: count(BookStatus::Wishlist),
            total: self.books.len(),
        }
    }
}
