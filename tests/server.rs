use sluice::handler::RouteHandler;
use sluice::http::{GatewayResponse, StatusCode};
use sluice::Gateway;

#[tokio::test]
async fn it_serves_routes_over_http() {
    tokio::spawn(async {
        let mut gateway = Gateway::new().bind("127.0.0.1:8791").without_cache();
        gateway.map_route(
            "/hello/:name",
            RouteHandler::new().get(|req| async move {
                let name = req.param("name").unwrap_or_default().to_owned();
                Ok(GatewayResponse::json(
                    StatusCode::OK,
                    &serde_json::json!({ "hello": name }),
                ))
            }),
        );
        gateway.run().await
    });

    let response = tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let client = reqwest::Client::new();
        client
            .get("http://127.0.0.1:8791/api/hello/world")
            .send()
            .await
            .unwrap()
    })
    .await
    .unwrap();

    assert!(response.status().is_success());
    assert_eq!(response.headers().get("x-content-type-options").unwrap(), "nosniff");
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["hello"], "world");
}

#[tokio::test]
async fn it_answers_404_for_declined_requests() {
    tokio::spawn(async {
        let mut gateway = Gateway::new().bind("127.0.0.1:8792").without_cache();
        gateway.map_route(
            "/known",
            RouteHandler::new().get(|_req| async {
                Ok(GatewayResponse::text(StatusCode::OK, "known"))
            }),
        );
        gateway.run().await
    });

    let response = tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let client = reqwest::Client::new();
        client
            .get("http://127.0.0.1:8792/outside/prefix")
            .send()
            .await
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "route_not_found");
}

#[tokio::test]
async fn it_serves_the_status_endpoint_over_http() {
    tokio::spawn(async {
        let mut gateway = Gateway::new().bind("127.0.0.1:8793");
        gateway.map_route(
            "/data",
            RouteHandler::new().get(|_req| async {
                Ok(GatewayResponse::json(StatusCode::OK, &serde_json::json!({ "ok": true })))
            }),
        );
        gateway.run().await
    });

    let response = tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let client = reqwest::Client::new();
        client
            .get("http://127.0.0.1:8793/api/__status")
            .send()
            .await
            .unwrap()
    })
    .await
    .unwrap();

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["routes"][0], "/data");
    assert!(body["compression"]["total"].as_u64().is_some());
}
