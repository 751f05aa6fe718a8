use std::net::SocketAddr;

use axum::http::{request::Parts, Extensions, HeaderMap, Method, Request, Uri};

use crate::auth::AccountabilityContext;

/// An inbound upgrade request plus the slot for its resolved accountability.
#[derive(Debug)]
pub struct UpgradeRequest {
    parts: Parts,
    remote_addr: Option<SocketAddr>,
    accountability: Option<AccountabilityContext>,
}

impl UpgradeRequest {
    pub fn new(parts: Parts, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            parts,
            remote_addr,
            accountability: None,
        }
    }

    pub fn from_request(request: Request<()>) -> Self {
        Self::new(request.into_parts().0, None)
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn parts(&self) -> &Parts {
        &self.parts
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Typed annotations filters may attach for the application loop.
    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn accountability(&self) -> Option<&AccountabilityContext> {
        self.accountability.as_ref()
    }

    /// Attach the resolved context. The first attachment wins; later calls
    /// are ignored and return `false`.
    pub fn attach_accountability(&mut self, accountability: AccountabilityContext) -> bool {
        if self.accountability.is_some() {
            tracing::warn!(path = %self.path(), "Accountability already attached, ignoring");
            return false;
        }
        self.accountability = Some(accountability);
        true
    }

    /// Authenticated user, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.accountability.as_ref().and_then(|a| a.user.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accountability_attaches_once() {
        let mut req =
            UpgradeRequest::from_request(Request::builder().uri("/websocket?x=1").body(()).unwrap());
        assert_eq!(req.path(), "/websocket");
        assert!(req.user_id().is_none());

        assert!(req.attach_accountability(AccountabilityContext::for_user("a")));
        assert!(!req.attach_accountability(AccountabilityContext::for_user("b")));
        assert_eq!(req.user_id(), Some("a"));
    }
}
