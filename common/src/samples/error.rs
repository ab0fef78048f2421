// Copyright © SixtyFPS GmbH <info@slint.dev>
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Errors surfaced by the samples controllers and the SensorPush client.
#[derive(Debug, Error)]
pub enum SamplesError {
    /// The authorization-code or access-token exchange did not yield the
    /// expected field, or could not be carried out at all.
    #[error("authentication failed: {context}")]
    Auth {
        /// What went wrong during the exchange.
        context: String,
    },

    /// The sensor listing was empty or malformed.
    #[error("sensor discovery failed: {context}")]
    Discovery {
        /// What went wrong while resolving the sensor.
        context: String,
    },

    /// An API call failed after authentication.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The HTTP client or the tokio runtime could not be constructed.
    #[error("client setup failed: {context}")]
    Setup {
        /// What went wrong during setup.
        context: String,
    },
}

impl SamplesError {
    /// Create an authentication error with the given context.
    pub fn auth(context: impl Into<String>) -> Self {
        Self::Auth {
            context: context.into(),
        }
    }

    /// Create a discovery error with the given context.
    pub fn discovery(context: impl Into<String>) -> Self {
        Self::Discovery {
            context: context.into(),
        }
    }

    /// Create a setup error with the given context.
    pub fn setup(context: impl Into<String>) -> Self {
        Self::Setup {
            context: context.into(),
        }
    }
}

/// A failed POST to the SensorPush API.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The API answered with a non-success status code.
    #[error("POST {endpoint} returned status {status}")]
    Status {
        /// Endpoint path relative to the API base URL.
        endpoint: String,
        /// The HTTP status code the API answered with.
        status: u16,
    },

    /// The request could not be sent or the response never arrived.
    #[error("POST {endpoint} failed: {source}")]
    Transport {
        /// Endpoint path relative to the API base URL.
        endpoint: String,
        /// The underlying transport failure.
        #[source]
        source: reqwest::Error,
    },

    /// The response body was not the expected JSON shape.
    #[error("POST {endpoint} returned an unexpected body: {source}")]
    Body {
        /// Endpoint path relative to the API base URL.
        endpoint: String,
        /// The underlying decoding failure.
        #[source]
        source: reqwest::Error,
    },
}

impl RequestError {
    /// True for the statuses that signal an expired or rejected access
    /// token and warrant re-running the token exchange.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == 401 || *status == 403)
    }
}

#[test]
fn test_error_display() {
    let err = SamplesError::auth("authorize response carried no authorization code");
    assert_eq!(
        err.to_string(),
        "authentication failed: authorize response carried no authorization code"
    );

    let err = SamplesError::from(RequestError::Status {
        endpoint: "samples".to_string(),
        status: 500,
    });
    assert_eq!(err.to_string(), "POST samples returned status 500");
}

#[test]
fn test_error_constructors() {
    assert!(matches!(
        SamplesError::auth("x"),
        SamplesError::Auth { .. }
    ));
    assert!(matches!(
        SamplesError::discovery("x"),
        SamplesError::Discovery { .. }
    ));
    assert!(matches!(
        SamplesError::setup("x"),
        SamplesError::Setup { .. }
    ));
}

#[test]
fn test_unauthorized_detection() {
    let status = |status| RequestError::Status {
        endpoint: "samples".to_string(),
        status,
    };
    assert!(status(401).is_unauthorized());
    assert!(status(403).is_unauthorized());
    assert!(!status(500).is_unauthorized());
    assert!(!status(200).is_unauthorized());
}
