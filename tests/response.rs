use courier::{collector, request, Error, Method, RequestOptions};
use futures_util::StreamExt as _;
use tokio::io::AsyncReadExt as _;

mod support;
use support::{init_tracing, large_body, BoxError, Server, LARGE};

#[tokio::test]
async fn buffer_twice_is_consumed() -> Result<(), BoxError> {
    init_tracing();
    let server = Server::start().await;

    let mut response = request(
        &server.url("/"),
        RequestOptions::new().method(Method::Post).body("abc"),
    )?
    .await?;
    assert_eq!(response.buffer().await?, "abc");
    assert!(response.is_consumed());

    let error = response.buffer().await.unwrap_err();
    assert!(matches!(error, Error::Consumed));
    assert_eq!(error.to_string(), "response body already consumed");
    assert!(matches!(response.text().await, Err(Error::Consumed)));
    Ok(())
}

#[tokio::test]
async fn chunks_then_collect() -> Result<(), BoxError> {
    let server = Server::start().await;

    let mut response = request(&server.url("/large"), RequestOptions::new())?.await?;
    let mut received = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received.len(), LARGE);
    assert_eq!(received, large_body());

    // The end stays the end, but the body cannot be collected any more.
    assert!(response.chunk().await?.is_none());
    assert!(matches!(response.buffer().await, Err(Error::Consumed)));
    Ok(())
}

#[tokio::test]
async fn pipe_to_file() -> Result<(), BoxError> {
    let server = Server::start().await;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("large.bin");

    let mut response = request(&server.url("/large"), RequestOptions::new())?.await?;
    let mut file = tokio::fs::File::create(&path).await?;
    let copied = response.pipe(&mut file).await?;
    drop(file);

    assert_eq!(copied, LARGE as u64);
    assert_eq!(tokio::fs::read(&path).await?, large_body());

    let mut sink = tokio::io::sink();
    assert!(matches!(response.pipe(&mut sink).await, Err(Error::Consumed)));
    Ok(())
}

#[tokio::test]
async fn read_after_partial_chunk() -> Result<(), BoxError> {
    let server = Server::start().await;

    let mut response = request(&server.url("/large"), RequestOptions::new())?.await?;
    let mut head = [0u8; 10];
    response.read_exact(&mut head).await?;

    // Bytes buffered by the read are not lost to the collector.
    let rest = response.buffer().await?;
    let mut all = head.to_vec();
    all.extend_from_slice(&rest);
    assert_eq!(all, large_body());
    Ok(())
}

#[tokio::test]
async fn read_to_end() -> Result<(), BoxError> {
    let server = Server::start().await;

    let mut response = request(&server.url("/large"), RequestOptions::new())?.await?;
    let mut body = Vec::new();
    response.read_to_end(&mut body).await?;
    assert_eq!(body.len(), LARGE);
    Ok(())
}

#[tokio::test]
async fn into_stream() -> Result<(), BoxError> {
    let server = Server::start().await;

    let response = request(&server.url("/large"), RequestOptions::new())?.await?;
    let mut stream = response.into_stream();
    let mut total = 0;
    while let Some(chunk) = stream.next().await {
        total += chunk?.len();
    }
    assert_eq!(total, LARGE);
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() -> Result<(), BoxError> {
    let server = Server::start().await;

    let mut response = request(&server.url("/bad-json"), RequestOptions::new())?.await?;
    let error = response.json::<serde_json::Value>().await.unwrap_err();
    assert!(error.is_parse(), "{error:?}");
    Ok(())
}

#[tokio::test]
async fn truncated_body_is_a_read_error() -> Result<(), BoxError> {
    init_tracing();
    let server = Server::truncated("{\"a\": 1").await;

    let mut response = request(&server.url("/"), RequestOptions::new())?.await?;
    let error = response.json::<serde_json::Value>().await.unwrap_err();
    assert!(matches!(error, Error::BodyRead(_)), "{error:?}");
    assert!(!error.is_parse());

    // The failed body was dropped.
    assert!(matches!(response.text().await, Err(Error::Consumed)));
    Ok(())
}

#[tokio::test]
async fn decode_with_charset() -> Result<(), BoxError> {
    let server = Server::start().await;

    let mut response = request(&server.url("/latin1"), RequestOptions::new())?.await?;
    assert_eq!(
        response.text_with_encoding(encoding_rs::WINDOWS_1252).await?,
        "café"
    );

    let mut response = request(&server.url("/latin1"), RequestOptions::new())?.await?;
    assert_eq!(response.text().await?, "caf\u{fffd}");
    Ok(())
}

#[tokio::test]
async fn custom_collector() -> Result<(), BoxError> {
    let server = Server::start().await;

    let mut response = request(
        &server.url("/"),
        RequestOptions::new().method(Method::Put).body("3,1,2"),
    )?
    .await?;

    let collector = courier::Collector::new(|bytes: bytes::Bytes| -> Result<Vec<u32>, BoxError> {
        let numbers = std::str::from_utf8(&bytes)?
            .split(',')
            .map(|n| n.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(numbers)
    });
    assert_eq!(response.collect(collector).await?, vec![3, 1, 2]);

    let leftover = response.collect(collector::buffer()).await;
    assert!(matches!(leftover, Err(Error::Consumed)));
    Ok(())
}
