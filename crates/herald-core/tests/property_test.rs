//! Property-based tests for destination invariants.

#![allow(clippy::unwrap_used)]

use herald_core::{Destination, Scheme};
use http::header;
use proptest::{prelude::*, test_runner::Config as ProptestConfig};

fn proptest_config() -> ProptestConfig {
    ProptestConfig { cases: 64, failure_persistence: None, ..ProptestConfig::default() }
}

fn host_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,20}(\\.[a-z][a-z0-9]{0,10}){0,3}").unwrap()
}

fn scheme_strategy() -> impl Strategy<Value = Scheme> {
    prop::sample::select(vec![Scheme::Http, Scheme::Https])
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn url_components_survive_parsing(
        scheme in scheme_strategy(),
        host in host_strategy(),
        port in 1u16..,
        path in prop::string::string_regex("(/[a-zA-Z0-9_-]{1,10}){0,4}").unwrap(),
    ) {
        let url = format!("{scheme}://{host}:{port}{path}");
        let dest = Destination::from_url("1", &url, &[]).unwrap();

        prop_assert_eq!(dest.scheme(), scheme);
        prop_assert_eq!(dest.host(), host.as_str());
        prop_assert_eq!(dest.port(), port);
        let expected_path = if path.is_empty() { "/" } else { path.as_str() };
        prop_assert_eq!(dest.path(), expected_path);
    }

    #[test]
    fn host_header_omits_only_default_port(
        scheme in scheme_strategy(),
        host in host_strategy(),
        port in 1u16..,
    ) {
        let dest = Destination::new("1", scheme, host.clone(), port, "/", &[]).unwrap();
        let host_header = dest.headers()[header::HOST].to_str().unwrap().to_string();

        if port == scheme.default_port() {
            prop_assert_eq!(host_header, host);
        } else {
            prop_assert_eq!(host_header, format!("{host}:{port}"));
        }
    }

    #[test]
    fn managed_headers_always_win(
        value in prop::string::string_regex("[a-zA-Z0-9/ ._-]{1,30}").unwrap(),
        name in prop::sample::select(vec!["Host", "content-type", "CONNECTION", "Content-Length"]),
    ) {
        let extra = vec![(name.to_string(), value)];
        let dest = Destination::new("1", Scheme::Http, "example.com", 80, "/", &extra).unwrap();

        prop_assert_eq!(&dest.headers()[header::CONTENT_TYPE], "application/json");
        prop_assert_eq!(&dest.headers()[header::CONNECTION], "keep-alive");
        prop_assert_eq!(&dest.headers()[header::HOST], "example.com");
        prop_assert!(dest.headers().get(header::CONTENT_LENGTH).is_none());
    }
}
