//! Request snapshot handed to reporters and exception filters.
//!
//! The request itself is consumed by the handler chain, so the recovery layer
//! keeps a copy of what it needs to describe the request after a fault.

use axum::http::{Extensions, HeaderMap, Method, Request, Uri, Version, request::Parts};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
    fault_id: Option<Uuid>,
}

impl RequestContext {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
            extensions: request.extensions().clone(),
            fault_id: None,
        }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
            extensions: parts.extensions.clone(),
            fault_id: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Retrieve a value the caller stored in the request extensions
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Store a caller-supplied value
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    /// Id of the intercepted fault, set once a fault has been reported
    pub fn fault_id(&self) -> Option<Uuid> {
        self.fault_id
    }

    pub fn with_fault_id(mut self, id: Uuid) -> Self {
        self.fault_id = Some(id);
        self
    }
}
