//! Route matching integration tests.

#[cfg(test)]
mod tests {
    use ruststub_http::{HandlerChain, RoutePath};

    use crate::{client, start_server, url};

    #[tokio::test]
    async fn test_should_serve_scripted_response_case_sensitively() {
        let server = start_server();
        server
            .on_get("/hello")
            .unwrap()
            .respond(|_, res| Ok(res.set_body("world")?));

        let resp = client().get(url(&server, "/hello")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "world");

        let resp = client().get(url(&server, "/Hello")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_should_return_404_without_routes() {
        let server = start_server();

        for path in ["/", "/anything", "/deep/path?q=1"] {
            let resp = client().get(url(&server, path)).send().await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND, "{path}");
            assert_eq!(resp.text().await.unwrap(), "");
        }
    }

    #[tokio::test]
    async fn test_should_prefer_first_registered_route() {
        let server = start_server();
        server
            .on_get(RoutePath::pattern("/items/.*"))
            .unwrap()
            .respond(|_, res| Ok(res.set_body("r1")?));
        server
            .on_get("/items/1")
            .unwrap()
            .respond(|_, res| Ok(res.set_body("r2")?));

        let resp = client().get(url(&server, "/items/1")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "r1");
    }

    #[tokio::test]
    async fn test_should_keep_duplicate_routes_independent() {
        let server = start_server();
        let first = server.on_get("/dup").unwrap();
        let second = server.on_get("/dup").unwrap();
        first.respond(|_, res| Ok(res.set_body("first")?));
        second.respond(|_, res| Ok(res.set_body("second")?));

        assert_eq!(server.routes().len(), 2);
        let resp = client().get(url(&server, "/dup")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_should_anchor_paths() {
        let server = start_server();
        server.on_get("/items").unwrap();

        let resp = client().get(url(&server, "/items")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let resp = client()
            .get(url(&server, "/items/extra"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_should_match_any_case_after_ignore_path_case() {
        let server = start_server();
        server
            .on_get("/Greeting")
            .unwrap()
            .ignore_path_case()
            .unwrap()
            .respond(|_, res| Ok(res.set_body("hi")?));

        for path in ["/greeting", "/GREETING", "/Greeting"] {
            let resp = client().get(url(&server, path)).send().await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn test_should_route_by_method() {
        let server = start_server();
        server
            .on_post("/thing")
            .unwrap()
            .respond(|_, res| Ok(res.set_body("posted")?));
        server
            .on_delete("/thing")
            .unwrap()
            .respond(|_, res| Ok(res.set_body("deleted")?));

        let resp = client().post(url(&server, "/thing")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "posted");
        let resp = client().delete(url(&server, "/thing")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "deleted");
        let resp = client().get(url(&server, "/thing")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_should_expose_captures_to_handlers() {
        let server = start_server();
        server
            .on_get(RoutePath::pattern(r"/users/(?P<id>\d+)/posts/(\d+)"))
            .unwrap()
            .respond_with_match(|matched, req, res| {
                let id = matched.name("id").unwrap_or_default();
                let post = req.capture(2).unwrap_or_default();
                res.set_body(format!("{id}:{post}"))?;
                Ok(())
            });

        let resp = client()
            .get(url(&server, "/users/12/posts/7"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "12:7");
    }

    #[tokio::test]
    async fn test_should_answer_head_and_options_routes() {
        let server = start_server();
        server.on_head("/probe").unwrap().respond(|_, res| {
            res.set_header("x-exists", "yes")?;
            Ok(())
        });
        server.on_options("/probe").unwrap().respond(|_, res| {
            res.set_header("allow", "GET, HEAD, OPTIONS")?;
            Ok(())
        });

        let resp = client().head(url(&server, "/probe")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()["x-exists"], "yes");

        let resp = client()
            .request(reqwest::Method::OPTIONS, url(&server, "/probe"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.headers()["allow"], "GET, HEAD, OPTIONS");
    }
}
