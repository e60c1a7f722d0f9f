use std::io::Cursor;
use std::time::Duration;

use super::scenario::Scenario;
use super::TestSliceExt;
use crate::{Data, FileLike, Pipeline, PostConnect, PreConnect, Proxy, STREAM_CHUNK_SIZE};

#[test]
fn headers_in_sorted_order() {
    let scenario = Scenario::builder().reply("http://a.test/", 200).build();

    let res = scenario
        .get("http://a.test")
        .header("x-b", "2")
        .header("x-a", "1")
        .send()
        .unwrap();
    res.status().unwrap();

    let sent = &scenario.sent()[0];
    assert_eq!(
        sent.order,
        ["accept", "accept-encoding", "user-agent", "x-a", "x-b"]
    );
    assert!(sent.headers["user-agent"].to_str().unwrap().starts_with("sloth/"));
}

#[test]
fn content_length_of_body() {
    let scenario = Scenario::builder().reply("http://a.test/", 200).build();

    scenario.post("http://a.test").data("hello").send().unwrap().status().unwrap();
    scenario.post("http://a.test").send().unwrap().status().unwrap();
    scenario.get("http://a.test").send().unwrap().status().unwrap();

    let sent = scenario.sent();
    assert_eq!(sent[0].headers["content-length"], "5");
    assert_eq!(sent[0].headers["content-type"], "text/plain");
    assert_eq!(sent[0].body.as_str(), "hello");

    assert_eq!(sent[1].headers["content-length"], "0");
    assert!(sent[1].body.is_empty());
    assert!(sent[1].writes.is_empty());

    assert!(sent[2].headers.get("content-length").is_none());
}

#[test]
fn json_body_sent() {
    let scenario = Scenario::builder().reply("http://a.test/", 200).build();

    let res = scenario
        .post("http://a.test")
        .json(&serde_json::json!({"a": 1}))
        .send()
        .unwrap();
    res.status().unwrap();

    let sent = &scenario.sent()[0];
    assert_eq!(sent.headers["content-type"], "application/json");
    assert_eq!(sent.body.as_str(), r#"{"a":1}"#);
}

#[test]
fn multipart_body_sent() {
    let scenario = Scenario::builder().reply("http://a.test/", 200).build();

    let res = scenario
        .post("http://a.test")
        .data([("k", "v")])
        .file(FileLike::new("up", "a.txt", "content"))
        .send()
        .unwrap();
    res.status().unwrap();

    let sent = &scenario.sent()[0];
    let ct = sent.headers["content-type"].to_str().unwrap();
    let boundary = ct.strip_prefix("multipart/form-data; boundary=").unwrap();

    let body = sent.body.as_str();
    assert!(body.starts_with(&format!("--{}\r\n", boundary)));
    assert!(body.contains("name=\"up\"; filename=\"a.txt\""));
    assert!(body.ends_with(&format!("--{}--\r\n", boundary)));
    assert_eq!(sent.headers["content-length"], body.len().to_string().as_str());
}

#[test]
fn reader_streamed_in_chunks() {
    let scenario = Scenario::builder().reply("http://a.test/", 200).build();

    let payload = vec![b'x'; STREAM_CHUNK_SIZE * 2 + 10];

    let res = scenario
        .post("http://a.test")
        .data(Data::reader(Cursor::new(payload.clone())))
        .send()
        .unwrap();
    res.status().unwrap();

    let sent = &scenario.sent()[0];
    assert_eq!(sent.headers["transfer-encoding"], "chunked");
    assert!(sent.headers.get("content-length").is_none());
    assert_eq!(sent.body, payload);
    assert!(sent.writes.iter().all(|n| *n <= STREAM_CHUNK_SIZE));
    assert_eq!(sent.writes.len(), 3);
}

#[test]
fn timeouts_applied() {
    let scenario = Scenario::builder().reply("http://a.test/", 200).build();

    scenario.get("http://a.test").timeout(1.5).send().unwrap().status().unwrap();
    scenario.get("http://a.test").send().unwrap().status().unwrap();

    let sent = scenario.sent();
    let t = Some(Duration::from_millis(1500));
    assert_eq!(sent[0].timeouts, (t, t));

    let t = Some(crate::DEFAULT_TIMEOUT);
    assert_eq!(sent[1].timeouts, (t, t));
}

#[test]
fn tls_only_for_https() {
    let scenario = Scenario::builder()
        .reply("http://a.test/", 200)
        .reply("https://a.test/", 200)
        .build();

    scenario.get("http://a.test").send().unwrap().status().unwrap();
    scenario.get("https://a.test").send().unwrap().status().unwrap();

    let sent = scenario.sent();
    assert!(!sent[0].tls);
    assert!(sent[1].tls);
}

#[test]
fn transport_redirects_disabled() {
    let scenario = Scenario::builder().reply("http://a.test/", 200).build();

    scenario.get("http://a.test").send().unwrap().status().unwrap();

    assert!(!scenario.sent()[0].auto_redirect);
}

#[test]
fn proxy_handed_to_transport() {
    let scenario = Scenario::builder().reply("http://a.test/", 200).build();

    scenario
        .get("http://a.test")
        .proxy(Proxy::new("proxy.test", 3128))
        .send()
        .unwrap()
        .status()
        .unwrap();

    let proxy = scenario.sent()[0].proxy.clone().unwrap();
    assert_eq!(proxy.host(), "proxy.test");
    assert_eq!(proxy.port(), 3128);
}

#[test]
fn pipeline_without_cookies() {
    let pipeline = Pipeline::new(
        [PreConnect::Method, PreConnect::Headers],
        [PostConnect::WriteBody, PostConnect::MergeCookies],
    );

    let scenario = Scenario::builder()
        .reply("http://a.test/", 200)
        .header("set-cookie", "s=1")
        .pipeline(pipeline)
        .build();

    let res = scenario.get("http://a.test").cookie("a", "1").send().unwrap();

    // Set-cookie is still collected.
    assert_eq!(res.cookies().unwrap().value("s"), Some("1"));

    let sent = &scenario.sent()[0];
    assert!(sent.headers.get("cookie").is_none());
    assert!(sent.auto_redirect);
    assert_eq!(sent.timeouts, (None, None));
}

#[test]
fn pipeline_without_body() {
    let pipeline = Pipeline::new(
        [PreConnect::Method, PreConnect::Headers],
        Vec::<PostConnect>::new(),
    );

    let scenario = Scenario::builder()
        .reply("http://a.test/", 200)
        .header("set-cookie", "s=1")
        .pipeline(pipeline)
        .build();

    let res = scenario.post("http://a.test").data("abc").send().unwrap();

    assert!(res.cookies().unwrap().is_empty());
    assert!(scenario.sent()[0].body.is_empty());
}
