//! Handler fault integration tests.

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use ruststub_http::HandlerChain;

    use crate::{client, start_server, url};

    #[tokio::test]
    async fn test_should_return_500_with_fault_text_and_keep_serving() {
        let server = start_server();
        server
            .on_get("/explode")
            .unwrap()
            .respond(|_, _| Err(anyhow::anyhow!("widget exploded").context("rendering page")));
        server
            .on_get("/fine")
            .unwrap()
            .respond(|_, res| Ok(res.set_body("still here")?));

        let resp = client().get(url(&server, "/explode")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body = resp.text().await.unwrap();
        assert!(body.contains("rendering page"), "{body}");
        assert!(body.contains("widget exploded"), "{body}");

        let resp = client().get(url(&server, "/fine")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "still here");
    }

    #[tokio::test]
    async fn test_should_survive_panicking_handler() {
        let server = start_server();
        server
            .on_get("/panic")
            .unwrap()
            .respond(|_, _| panic!("handler lost its mind"));
        server.on_get("/ok").unwrap();

        let resp = client().get(url(&server, "/panic")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.text().await.unwrap().contains("handler lost its mind"));

        let resp = client().get(url(&server, "/ok")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_should_fault_in_global_pipeline_before_routing() {
        let server = start_server();
        server
            .on_any_request()
            .respond(|_, _| anyhow::bail!("global check failed"));
        server.on_get("/never").unwrap();

        let resp = client().get(url(&server, "/never")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.text().await.unwrap().contains("global check failed"));
    }

    #[tokio::test]
    async fn test_should_not_block_other_connections_on_slow_handler() {
        let server = start_server();
        server.on_get("/slow").unwrap().respond(|_, res| {
            std::thread::sleep(Duration::from_millis(800));
            Ok(res.set_body("slow")?)
        });
        server
            .on_get("/fast")
            .unwrap()
            .respond(|_, res| Ok(res.set_body("fast")?));

        let slow_url = url(&server, "/slow");
        let slow = tokio::spawn(async move { client().get(slow_url).send().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let resp = client().get(url(&server, "/fast")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "fast");
        assert!(started.elapsed() < Duration::from_millis(600));

        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.text().await.unwrap(), "slow");
    }
}
