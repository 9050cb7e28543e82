//! HTTP plumbing shared by the inbound and outbound request paths.

use crate::{Error, SHED_HEADER};
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{header, HeaderValue, Request, Response, StatusCode, Uri};
use std::net::SocketAddr;

/// Redirects a request at a concrete endpoint, preserving the logical
/// destination in the `Host` header.
///
/// hyper derives `Host` from the target URI when the header is absent, so it
/// must be pinned before the authority is overwritten.
pub fn rewrite_to<B>(req: &mut Request<B>, addr: SocketAddr) -> Result<(), Error> {
    if !req.headers().contains_key(header::HOST) {
        if let Some(authority) = req.uri().authority() {
            let host = HeaderValue::from_str(authority.as_str())?;
            req.headers_mut().insert(header::HOST, host);
        }
    }

    let mut parts = req.uri().clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(addr.to_string().parse::<Authority>()?);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    *req.uri_mut() = Uri::from_parts(parts)?;
    Ok(())
}

/// A locally synthesized response with an empty body.
pub fn synthesized<B: Default>(status: StatusCode) -> Response<B> {
    Response::builder()
        .status(status)
        .body(B::default())
        .expect("builder with known status code must not fail")
}

/// A 503 carrying the shed marker, distinguishing local overload rejection
/// from an upstream's own 503.
pub fn shed_response<B: Default>() -> Response<B> {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(SHED_HEADER, "true")
        .body(B::default())
        .expect("builder with known status code must not fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_points_at_the_endpoint_and_keeps_host() {
        let mut req = Request::builder()
            .uri("http://billing.shop:8080/charge?amt=1")
            .body(())
            .unwrap();
        rewrite_to(&mut req, "10.1.2.3:9000".parse().unwrap()).unwrap();

        assert_eq!(req.uri().authority().unwrap().as_str(), "10.1.2.3:9000");
        assert_eq!(
            req.uri().path_and_query().unwrap().as_str(),
            "/charge?amt=1"
        );
        assert_eq!(
            req.headers().get(header::HOST).unwrap(),
            "billing.shop:8080"
        );
    }

    #[test]
    fn rewrite_keeps_an_explicit_host_header() {
        let mut req = Request::builder()
            .uri("/charge")
            .header(header::HOST, "billing.shop")
            .body(())
            .unwrap();
        rewrite_to(&mut req, "10.1.2.3:9000".parse().unwrap()).unwrap();

        assert_eq!(req.uri().authority().unwrap().as_str(), "10.1.2.3:9000");
        assert_eq!(req.headers().get(header::HOST).unwrap(), "billing.shop");
    }

    #[test]
    fn authority_form_requests_get_a_default_path() {
        let mut req = Request::builder().uri("billing.shop:8080").body(()).unwrap();
        rewrite_to(&mut req, "10.1.2.3:9000".parse().unwrap()).unwrap();
        assert_eq!(req.uri().path(), "/");
        assert_eq!(
            req.headers().get(header::HOST).unwrap(),
            "billing.shop:8080"
        );
    }

    #[test]
    fn sheds_are_marked() {
        let rsp = shed_response::<()>();
        assert_eq!(rsp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(rsp.headers().get(SHED_HEADER).unwrap(), "true");
    }
}
