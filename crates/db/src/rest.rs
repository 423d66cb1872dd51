//! Query builder over the REST view of the relational store.
//!
//! Filters use the store's `column=op.value` query syntax. Writes ask for
//! `return=representation` so callers get the affected rows back.

use serde::{de::DeserializeOwned, Serialize};

use crate::{check, BackendClient, BackendError};

const RETURN_REPRESENTATION: &str = "return=representation";

pub struct TableQuery<'a> {
    client: &'a BackendClient,
    table: String,
    filters: Vec<(String, String)>,
    order: Option<String>,
}

impl<'a> TableQuery<'a> {
    pub(crate) fn new(client: &'a BackendClient, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
            filters: Vec::new(),
            order: None,
        }
    }

    /// Keep rows whose `column` equals `value`.
    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters
            .push((column.to_string(), format!("eq.{}", value.to_string())));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.order = Some(format!("{column}.{direction}"));
        self
    }

    fn path(&self) -> String {
        format!("/rest/v1/{}", self.table)
    }

    /// Query string pairs in the order they are sent.
    pub fn query_pairs(&self, with_select: bool) -> Vec<(String, String)> {
        let mut pairs = self.filters.clone();
        if let Some(order) = &self.order {
            pairs.push(("order".to_string(), order.clone()));
        }
        if with_select {
            pairs.push(("select".to_string(), "*".to_string()));
        }
        pairs
    }

    pub async fn select<T: DeserializeOwned>(self) -> Result<Vec<T>, BackendError> {
        let request = self
            .client
            .http
            .get(self.client.url(&self.path()))
            .query(&self.query_pairs(true));
        let response = self.client.authorize(request, None).send().await?;

        Ok(check(response).await?.json().await?)
    }

    pub async fn insert<B, T>(self, rows: &[B]) -> Result<Vec<T>, BackendError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let request = self
            .client
            .http
            .post(self.client.url(&self.path()))
            .query(&self.query_pairs(true))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(rows);
        let response = self.client.authorize(request, None).send().await?;

        Ok(check(response).await?.json().await?)
    }

    /// Apply `patch` to every row matching the filters; returns those rows.
    pub async fn update<B, T>(self, patch: &B) -> Result<Vec<T>, BackendError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let request = self
            .client
            .http
            .patch(self.client.url(&self.path()))
            .query(&self.query_pairs(true))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(patch);
        let response = self.client.authorize(request, None).send().await?;

        Ok(check(response).await?.json().await?)
    }

    /// Delete matching rows. Matching nothing is not an error.
    pub async fn delete(self) -> Result<(), BackendError> {
        let request = self
            .client
            .http
            .delete(self.client.url(&self.path()))
            .query(&self.query_pairs(false));
        let response = self.client.authorize(request, None).send().await?;
        check(response).await?;

        Ok(())
    }
}
