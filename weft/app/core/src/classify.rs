//! Response classification for metrics and outlier accounting.

use weft_limit::ShedError;

/// The terminal disposition of one proxied request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Class {
    Success,
    Failure,
    /// Rejected locally before reaching an endpoint; never charged against
    /// outlier state.
    Shed,
}

pub fn of_response<B>(rsp: &http::Response<B>) -> Class {
    if rsp.status() == http::StatusCode::SERVICE_UNAVAILABLE
        && rsp.headers().contains_key(crate::SHED_HEADER)
    {
        return Class::Shed;
    }
    of_status(rsp.status())
}

/// Status-only classification. Server errors count against the endpoint;
/// client errors are the caller's fault and do not.
pub fn of_status(status: http::StatusCode) -> Class {
    if status.is_server_error() {
        Class::Failure
    } else {
        Class::Success
    }
}

pub fn of_error(error: &(dyn std::error::Error + 'static)) -> Class {
    if weft_error::is_caused_by::<ShedError>(error) {
        Class::Shed
    } else {
        Class::Failure
    }
}

// === impl Class ===

impl Class {
    pub fn is_failure(self) -> bool {
        matches!(self, Class::Failure)
    }

    pub fn is_success(self) -> bool {
        matches!(self, Class::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Response, StatusCode};

    fn rsp(status: StatusCode) -> Response<()> {
        Response::builder().status(status).body(()).unwrap()
    }

    #[test]
    fn statuses() {
        assert_eq!(of_status(StatusCode::OK), Class::Success);
        assert_eq!(of_status(StatusCode::NOT_FOUND), Class::Success);
        assert_eq!(of_status(StatusCode::INTERNAL_SERVER_ERROR), Class::Failure);
        assert_eq!(of_status(StatusCode::BAD_GATEWAY), Class::Failure);
    }

    #[test]
    fn shed_marker_distinguishes_local_rejection() {
        let marked = Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(crate::SHED_HEADER, "true")
            .body(())
            .unwrap();
        assert_eq!(of_response(&marked), Class::Shed);

        // An upstream 503 without the marker is an ordinary failure.
        assert_eq!(
            of_response(&rsp(StatusCode::SERVICE_UNAVAILABLE)),
            Class::Failure
        );
    }

    #[test]
    fn shed_errors_classify_as_shed() {
        let error: weft_error::Error = ShedError::default().into();
        assert_eq!(of_error(&*error), Class::Shed);

        let other: weft_error::Error = "connection refused".into();
        assert_eq!(of_error(&*other), Class::Failure);
    }
}
