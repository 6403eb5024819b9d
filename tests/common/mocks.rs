use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use xml_resolution::error::FetchResult;
use xml_resolution::{HttpResponse, SchemaFetcher};

pub const LAST_MODIFIED: &str = "Wed, 21 Oct 2009 07:28:00 GMT";

/// In-memory fetcher. Unknown URLs answer 404; every request is logged.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, HttpResponse>>>,
    request_log: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response(&self, url: &str, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn add_schema(&self, url: &str, body: &str) {
        self.add_response(
            url,
            HttpResponse {
                status: 200,
                last_modified: Some(LAST_MODIFIED.to_string()),
                body: body.as_bytes().to_vec(),
                ..Default::default()
            },
        );
    }

    pub fn add_redirect(&self, url: &str, target: &str) {
        self.add_response(
            url,
            HttpResponse {
                status: 302,
                location: Some(target.to_string()),
                ..Default::default()
            },
        );
    }

    pub fn requests(&self) -> Vec<String> {
        self.request_log.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|u| u.as_str() == url).count()
    }
}

impl SchemaFetcher for MockFetcher {
    async fn get(&self, url: &str) -> FetchResult<HttpResponse> {
        self.request_log.lock().unwrap().push(url.to_string());
        let response = self.responses.lock().unwrap().get(url).cloned();
        Ok(response.unwrap_or(HttpResponse {
            status: 404,
            ..Default::default()
        }))
    }
}
