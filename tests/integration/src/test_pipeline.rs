//! Middleware pipeline integration tests.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use ruststub_http::{Exchange, HandlerChain, Next, RouteMatch};

    use crate::{client, start_server, url};

    #[tokio::test]
    async fn test_should_apply_global_handler_to_every_route() {
        let server = start_server();
        server.on_any_request().respond(|_, res| {
            res.set_header("x-trace", "1")?;
            Ok(())
        });
        server.on_get("/ping").unwrap();

        let resp = client().get(url(&server, "/ping")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()["x-trace"], "1");

        // Unmatched requests still pass through the global pipeline.
        let resp = client().get(url(&server, "/nope")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()["x-trace"], "1");
    }

    #[tokio::test]
    async fn test_should_run_global_handlers_before_route_handlers_in_order() {
        let server = start_server();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["g1", "g2"] {
            let log = Arc::clone(&log);
            server.on_any_request().respond(move |req, _| {
                assert!(!req.route_match().is_success());
                log.lock().unwrap().push(name);
                Ok(())
            });
        }
        let route = server.on_get("/ordered").unwrap();
        for name in ["r1", "r2"] {
            let log = Arc::clone(&log);
            route.respond(move |req, _| {
                assert!(req.route_match().is_success());
                log.lock().unwrap().push(name);
                Ok(())
            });
        }

        let resp = client().get(url(&server, "/ordered")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["g1", "g2", "r1", "r2"]);
    }

    #[tokio::test]
    async fn test_should_short_circuit_when_continuation_is_skipped() {
        let server = start_server();
        let reached = Arc::new(Mutex::new(Vec::new()));

        server
            .on_any_request()
            .handle(|_: &RouteMatch, ex: &mut Exchange, next: Next<'_>| {
                if ex.request.header("x-block").is_some() {
                    ex.response.set_status(reqwest::StatusCode::SERVICE_UNAVAILABLE);
                    return Ok(());
                }
                next.run(ex)
            });
        let later = Arc::clone(&reached);
        server.on_any_request().respond(move |_, _| {
            later.lock().unwrap().push("global");
            Ok(())
        });
        let route = Arc::clone(&reached);
        server.on_get("/guarded").unwrap().respond(move |_, _| {
            route.lock().unwrap().push("route");
            Ok(())
        });

        let resp = client()
            .get(url(&server, "/guarded"))
            .header("x-block", "1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert!(reached.lock().unwrap().is_empty());

        let resp = client().get(url(&server, "/guarded")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(*reached.lock().unwrap(), vec!["global", "route"]);
    }

    #[tokio::test]
    async fn test_should_wrap_downstream_handlers() {
        let server = start_server();
        server
            .on_any_request()
            .handle_exchange(|ex: &mut Exchange, next: Next<'_>| {
                ex.response.set_body("[")?;
                next.run(ex)?;
                ex.response.set_body("]")?;
                Ok(())
            });
        server
            .on_get("/wrapped")
            .unwrap()
            .respond(|_, res| Ok(res.set_body("inner")?));

        let resp = client().get(url(&server, "/wrapped")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "[inner]");
    }

    #[tokio::test]
    async fn test_should_let_later_handlers_override_status() {
        let server = start_server();
        server
            .on_get("/status")
            .unwrap()
            .respond(|_, res| {
                res.set_status(reqwest::StatusCode::CREATED);
                Ok(())
            })
            .respond(|_, res| {
                res.set_status(reqwest::StatusCode::ACCEPTED);
                Ok(())
            });

        let resp = client().get(url(&server, "/status")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
    }
}
