//! Authentication scheme integration tests.

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use ruststub_core::StaticCredentialProvider;
    use ruststub_http::{AuthScheme, HandlerChain, StubServerConfig};

    use crate::{client, start_server, start_server_with, url};

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    #[tokio::test]
    async fn test_should_challenge_then_admit_basic_route() {
        let server = start_server();
        server
            .on_get("/secure")
            .unwrap()
            .with_auth_scheme(AuthScheme::Basic)
            .respond(|req, res| {
                let who = req.principal().map(|p| p.name().to_owned());
                res.set_body(who)?;
                Ok(())
            });
        server.on_get("/open").unwrap();

        let resp = client().get(url(&server, "/secure")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()["www-authenticate"],
            "Basic realm=\"RustStub\""
        );

        let resp = client()
            .get(url(&server, "/secure"))
            .header("authorization", basic("carol", "whatever"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "carol");

        let resp = client().get(url(&server, "/open")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_should_check_passwords_with_credential_provider() {
        let config = StubServerConfig {
            realm: "vault".to_owned(),
            ..StubServerConfig::default()
        }
        .with_credential_provider(StaticCredentialProvider::new(vec![(
            "alice".to_owned(),
            "s3cret".to_owned(),
        )]));
        let server = start_server_with(config);
        server.on_any_request().with_auth_scheme(AuthScheme::Basic);
        server.on_get("/vault").unwrap();

        let resp = client()
            .get(url(&server, "/vault"))
            .header("authorization", basic("alice", "wrong"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()["www-authenticate"], "Basic realm=\"vault\"");

        let resp = client()
            .get(url(&server, "/vault"))
            .header("authorization", basic("alice", "s3cret"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_should_forbid_everything_under_scheme_none() {
        let server = start_server();
        server.on_any_request().with_auth_scheme(AuthScheme::None);
        server
            .on_get("/anything")
            .unwrap()
            .respond(|_, _| panic!("pipelines must not run for rejected requests"));

        for path in ["/anything", "/missing"] {
            let resp = client().get(url(&server, path)).send().await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN, "{path}");
        }
    }

    #[tokio::test]
    async fn test_should_let_global_scheme_override_route_scheme() {
        let server = start_server();
        server.on_any_request().with_auth_scheme(AuthScheme::Anonymous);
        server
            .on_get("/was-secure")
            .unwrap()
            .with_auth_scheme(AuthScheme::Basic);

        let resp = client()
            .get(url(&server, "/was-secure"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }
}
