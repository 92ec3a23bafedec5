//! Listener lifecycle integration tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ruststub_http::{HandlerChain, StubServerConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::{client, start_server, start_server_with, url};

    #[tokio::test]
    async fn test_should_release_port_after_stop() {
        let server = start_server();
        server.on_get("/up").unwrap();
        let addr = server.local_addr();

        let resp = client().get(url(&server, "/up")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        server.stop().unwrap();
        assert!(!server.is_listening());
        assert!(server.listener_fault().is_none());
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }

    #[tokio::test]
    async fn test_should_serve_on_requested_port() {
        let port = ruststub_http::choose_random_unused_port().unwrap();
        let server = start_server_with(StubServerConfig::default().with_port(port));
        server.on_get("/fixed").unwrap();

        assert_eq!(server.port(), port);
        assert_eq!(server.base_uri(), format!("http://localhost:{port}/"));
        let resp = client()
            .get(format!("http://127.0.0.1:{port}/fixed"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_should_drop_connection_when_aborted() {
        let server = start_server();
        server.on_get("/abort").unwrap().respond(|_, res| {
            res.set_body("never sent")?;
            res.abort();
            Ok(())
        });

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(b"GET /abort HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .expect("connection should close promptly");
        match read {
            Ok(n) => assert_eq!(n, 0, "unexpected response: {}", String::from_utf8_lossy(&buf)),
            Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        }
    }

    #[tokio::test]
    async fn test_should_expose_peer_address() {
        let server = start_server();
        server.on_get("/whoami").unwrap().respond(|req, res| {
            let ip = req.remote_addr().map(|a| a.ip().to_string());
            res.set_body(ip)?;
            Ok(())
        });

        let resp = client().get(url(&server, "/whoami")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_should_register_routes_from_handlers() {
        let server = start_server();
        let routes = std::sync::Arc::clone(server.routes());
        server.on_post("/register").unwrap().respond(move |req, _| {
            let path = req.body_text()?.to_owned();
            routes
                .add_route(reqwest::Method::GET, path.as_str())?
                .respond(|_, res| Ok(res.set_body("registered")?));
            Ok(())
        });

        let resp = client()
            .post(url(&server, "/register"))
            .body("/late")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let resp = client().get(url(&server, "/late")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "registered");
    }
}
