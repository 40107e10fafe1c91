//! Cursor pagination over collection endpoints.
//!
//! Collections come back one page at a time with an opaque continuation URL
//! in `@odata.nextLink`. The link is followed verbatim until a page arrives
//! without one.

use crate::connection::{Connection, ConnectionCore, DriveTask};
use crate::error::{DriveError, Result};
use crate::request::ApiRequest;
use bridge_traits::http::HttpResponse;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// One page of a collection.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,

    #[serde(rename = "@odata.nextLink", alias = "nextLink", default)]
    pub next_link: Option<String>,
}

impl ConnectionCore {
    #[instrument(skip(self, request), fields(path = %request.target))]
    pub(crate) async fn fetch_all<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut pages: u32 = 0;
        let mut next = Some(request.clone());

        while let Some(current) = next.take() {
            if let Some(limit) = self.config.max_pages {
                if pages >= limit {
                    warn!(limit, items = items.len(), "Page limit reached");
                    return Err(DriveError::PageLimitExceeded { limit });
                }
            }

            let page: Page<T> = self
                .execute(&current, |response: &HttpResponse| {
                    serde_json::from_slice::<Page<T>>(&response.body)
                })
                .await?;
            pages += 1;

            debug!(page = pages, items = page.value.len(), "Fetched page");
            items.extend(page.value);
            next = page.next_link.map(ApiRequest::get);
        }

        debug!(pages, items = items.len(), "Collection complete");
        Ok(items)
    }
}

impl Connection {
    /// Collect every item of a paginated collection, in server order.
    ///
    /// # Errors
    ///
    /// Any page failing fails the whole fetch. With
    /// `ConnectionConfig::max_pages` set, needing more pages than that is
    /// [`DriveError::PageLimitExceeded`].
    pub fn fetch_all<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<Vec<T>> {
        self.run(self.core.fetch_all(&request))
    }

    /// Pooled form of [`Connection::fetch_all`].
    pub fn fetch_all_async<T>(&self, request: ApiRequest) -> DriveTask<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        self.submit(async move { core.fetch_all(&request).await }, None)
    }
}
