//! Storage seam for books.
//!
//! Every method except [`BookRepository::set_status`] takes the owner and
//! must scope by it. `set_status` takes an optional owner because the
//! status-only route historically filters by id alone.

use async_trait::async_trait;
use serde::Serialize;
use shelf_db::{BackendClient, BackendError};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{Book, BookInput, BookStatus, StatusFilter};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("backend returned no row for {0}")]
    MissingRow(&'static str),
}

impl RepositoryError {
    /// Message suitable for echoing back to the caller.
    pub fn message(&self) -> String {
        match self {
            RepositoryError::Backend(e) => e.message(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait BookRepository: Send + Sync {
    /// Owner's books, newest first.
    async fn list(&self, owner: Uuid, filter: StatusFilter) -> Result<Vec<Book>, RepositoryError>;

    async fn create(&self, owner: Uuid, input: BookInput) -> Result<Book, RepositoryError>;

    /// Full edit; `None` when no row has both this id and this owner.
    async fn update(
        &self,
        owner: Uuid,
        id: Uuid,
        input: BookInput,
    ) -> Result<Option<Book>, RepositoryError>;

    /// Status-only edit; scoped by owner only when one is given.
    async fn set_status(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        status: BookStatus,
    ) -> Result<Option<Book>, RepositoryError>;

    /// Remove the row if owned by `owner`. Matching nothing is not an error.
    async fn delete(&self, owner: Uuid, id: Uuid) -> Result<(), RepositoryError>;
}

/// In-process store with the same scoping rules as the hosted one.
#[derive(Default)]
pub struct MemoryBookRepository {
    books: RwLock<Vec<Book>>,
}

impl MemoryBookRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookRepository for MemoryBookRepository {
    async fn list(&self, owner: Uuid, filter: StatusFilter) -> Result<Vec<Book>, RepositoryError> {
        let books = self.books.read().await;
        // Later inserts first, so equal timestamps still come out newest first.
        let mut matching: Vec<Book> = books
            .iter()
            .rev()
            .filter(|b| b.user_id == owner && filter.matches(b.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn create(&self, owner: Uuid, input: BookInput) -> Result<Book, RepositoryError> {
        let book = Book {
            id: Uuid::new_v4(),
            title: input.title,
            author: input.author,
            status: input.status,
            user_id: owner,
            created_at: OffsetDateTime::now_utc(),
        };
        self.books.write().await.push(book.clone());
        Ok(book)
    }

    async fn update(
        &self,
        owner: Uuid,
        id: Uuid,
        input: BookInput,
    ) -> Result<Option<Book>, RepositoryError> {
        let mut books = self.books.write().await;
        Ok(books
            .iter_mut()
            .find(|b| b.id == id && b.user_id == owner)
            .map(|book| {
                book.title = input.title;
                book.author = input.author;
                book.status = input.status;
                book.clone()
            }))
    }

    async fn set_status(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        status: BookStatus,
    ) -> Result<Option<Book>, RepositoryError> {
        let mut books = self.books.write().await;
        Ok(books
            .iter_mut()
            .find(|b| b.id == id && owner.map_or(true, |owner| b.user_id == owner))
            .map(|book| {
                book.status = status;
                book.clone()
            }))
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> Result<(), RepositoryError> {
        self.books
            .write()
            .await
            .retain(|b| !(b.id == id && b.user_id == owner));
        Ok(())
    }
}

#[derive(Serialize)]
struct NewRow<'a> {
    title: &'a str,
    author: &'a str,
    status: BookStatus,
    user_id: Uuid,
}

#[derive(Serialize)]
struct StatusPatch {
    status: BookStatus,
}

/// Books table in the hosted store, reached with the service-role key.
pub struct RestBookRepository {
    client: BackendClient,
    table: String,
}

impl RestBookRepository {
    pub fn new(client: BackendClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl BookRepository for RestBookRepository {
    async fn list(&self, owner: Uuid, filter: StatusFilter) -> Result<Vec<Book>, RepositoryError> {
        let mut query = self.client.from(&self.table).eq("user_id", owner);
        if let Some(status) = filter.as_query() {
            query = query.eq("status", status);
        }
        Ok(query.order("created_at", false).select().await?)
    }

    async fn create(&self, owner: Uuid, input: BookInput) -> Result<Book, RepositoryError> {
        let row = NewRow {
            title: &input.title,
            author: &input.author,
            status: input.status,
            user_id: owner,
        };
        let created: Vec<Book> = self.client.from(&self.table).insert(&[row]).await?;
        created
            .into_iter()
            .next()
            .ok_or(RepositoryError::MissingRow("insert"))
    }

    async fn update(
        &self,
        owner: Uuid,
        id: Uuid,
        input: BookInput,
    ) -> Result<Option<Book>, RepositoryError> {
        let updated: Vec<Book> = self
            .client
            .from(&self.table)
            .eq("id", id)
            .eq("user_id", owner)
            .update(&input)
            .await?;
        Ok(updated.into_iter().next())
    }

    async fn set_status(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        status: BookStatus,
    ) -> Result<Option<Book>, RepositoryError> {
        let mut query = self.client.from(&self.table).eq("id", id);
        if let Some(owner) = owner {
            query = query.eq("user_id", owner);
        }
        let updated: Vec<Book> = query.update(&StatusPatch { status }).await?;
        Ok(updated.into_iter().next())
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> Result<(), RepositoryError> {
        self.client
            .from(&self.table)
            .eq("id", id)
            .eq("user_id", owner)
            .delete()
            .await?;
        Ok(())
    }
}
