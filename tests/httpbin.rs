use std::io::Cursor;
use std::net::TcpListener;
use std::sync::OnceLock;
use std::thread;

use serde_json::{json, Value};
use sloth::{Data, ErrorKind, FileLike};

/// Base url of a slothbin server shared by all tests.
fn base() -> &'static str {
    static BASE: OnceLock<String> = OnceLock::new();

    BASE.get_or_init(|| {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let served = base.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else {
                    continue;
                };
                let base = served.clone();
                thread::spawn(move || {
                    let input = stream.try_clone().unwrap();
                    if let Err(e) = slothbin::serve_single(input, &stream, &base) {
                        eprintln!("slothbin: {}", e);
                    }
                });
            }
        });

        base
    })
}

fn url(path: &str) -> String {
    format!("{}{}", base(), path)
}

#[test]
fn get_with_params() {
    let res = sloth::get(url("/get")).param("a", "1").param("a", "2").send().unwrap();

    assert_eq!(res.status().unwrap(), 200);
    assert_eq!(res.reason().unwrap(), "OK");

    let v: Value = res.json().unwrap();
    assert_eq!(v["args"]["a"], json!(["1", "2"]));
    assert!(v["headers"]["user-agent"].as_str().unwrap().starts_with("sloth/"));
    assert_eq!(v["headers"]["accept"], "*/*");
}

#[test]
fn post_form() {
    let res = sloth::post(url("/post")).data([("k", "v"), ("x", "a b")]).send().unwrap();

    let v: Value = res.json().unwrap();
    assert_eq!(v["form"], json!({"k": "v", "x": "a b"}));
    assert_eq!(
        v["headers"]["content-type"],
        "application/x-www-form-urlencoded"
    );
}

#[test]
fn put_json() {
    let res = sloth::put(url("/put")).json(&json!({"n": 1})).send().unwrap();

    let v: Value = res.json().unwrap();
    assert_eq!(v["json"], json!({"n": 1}));
    assert_eq!(v["method"], "PUT");
}

#[test]
fn patch_and_delete() {
    let res = sloth::patch(url("/patch")).data("x").send().unwrap();
    assert_eq!(res.status().unwrap(), 200);

    let res = sloth::delete(url("/delete")).send().unwrap();
    assert_eq!(res.json::<Value>().unwrap()["method"], "DELETE");
}

#[test]
fn streamed_reader_body() {
    let payload = "z".repeat(10_000);

    let res = sloth::post(url("/post"))
        .data(Data::reader(Cursor::new(payload.clone().into_bytes())))
        .send()
        .unwrap();

    let v: Value = res.json().unwrap();
    assert_eq!(v["headers"]["transfer-encoding"], "chunked");
    assert_eq!(v["data"].as_str().unwrap(), payload);
}

#[test]
fn multipart_upload() {
    let res = sloth::post(url("/post"))
        .data([("field", "value")])
        .file(FileLike::new("upload", "notes.txt", "file contents"))
        .send()
        .unwrap();

    let v: Value = res.json().unwrap();
    assert_eq!(v["form"]["field"], "value");
    assert_eq!(v["files"]["upload"], "file contents");
}

#[test]
fn redirect_chain() {
    let res = sloth::get(url("/redirect/3")).send().unwrap();

    assert_eq!(res.status().unwrap(), 302);

    let history = res.history().unwrap();
    assert_eq!(history.len(), 3);

    let last = history.last().unwrap();
    assert_eq!(last.status().unwrap(), 200);
    assert_eq!(last.url().unwrap().path(), "/get");
    assert_eq!(last.json::<Value>().unwrap()["method"], "GET");
}

#[test]
fn redirect_to_with_status() {
    let res = sloth::post(url("/redirect-to"))
        .param("url", "/get")
        .param("status_code", "303")
        .data("gone")
        .send()
        .unwrap();

    assert_eq!(res.status().unwrap(), 303);
    let last = &res.history().unwrap()[0];
    assert_eq!(last.status().unwrap(), 200);
    assert_eq!(last.request().method(), "GET");
}

#[test]
fn cookies_follow_redirect() {
    let res = sloth::get(url("/cookies/set"))
        .param("k", "v")
        .cookie("mine", "1")
        .send()
        .unwrap();

    let last = &res.history().unwrap()[0];
    let v: Value = last.json().unwrap();
    assert_eq!(v["cookies"], json!({"k": "v", "mine": "1"}));

    assert_eq!(res.cookies().unwrap().value("k"), Some("v"));
}

#[test]
fn basic_auth() {
    let res = sloth::get(url("/basic-auth/user/passwd"))
        .basic_auth("user", "passwd")
        .send()
        .unwrap();
    assert_eq!(res.status().unwrap(), 200);

    let res = sloth::get(url("/basic-auth/user/passwd"))
        .basic_auth("user", "wrong")
        .send()
        .unwrap();
    assert_eq!(res.status().unwrap(), 401);
}

#[cfg(feature = "gzip")]
#[test]
fn gzip_and_deflate() {
    for path in ["/gzip", "/deflate"] {
        let res = sloth::get(url(path)).send().unwrap();
        let v: Value = res.json().unwrap();
        assert_eq!(v["method"], "GET", "{}", path);
    }
}

#[test]
fn latin1_text() {
    let res = sloth::get(url("/encoding/latin1")).send().unwrap();

    assert_eq!(res.encoding().unwrap().name(), "windows-1252");
    assert_eq!(res.text().unwrap(), "café");
}

#[test]
fn stream_lines() {
    let res = sloth::get(url("/stream-lines/5")).stream(true).send().unwrap();

    let lines: Vec<String> = res
        .iter_lines(3, None)
        .unwrap()
        .map(|l| String::from_utf8(l.unwrap()).unwrap())
        .collect();

    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "line 0");
    assert_eq!(lines[4], "line 4");
}

#[test]
fn bytes_content() {
    let res = sloth::get(url("/bytes/3000")).send().unwrap();

    assert_eq!(res.content().unwrap().len(), 3000);
    assert_eq!(res.header("content-length").unwrap(), Some("3000"));
}

#[test]
fn status_without_reason() {
    let res = sloth::get(url("/status/418")).send().unwrap();

    assert_eq!(res.status().unwrap(), 418);
    assert_eq!(res.reason().unwrap(), "");
    assert!(res.content().unwrap().is_empty());
}

#[test]
fn head_has_empty_body() {
    let res = sloth::head(url("/get")).send().unwrap();

    assert_eq!(res.status().unwrap(), 200);
    assert!(res.content().unwrap().is_empty());
}

#[test]
fn options_request() {
    let res = sloth::options(url("/anything/x")).send().unwrap();
    assert_eq!(res.json::<Value>().unwrap()["method"], "OPTIONS");
}

#[test]
fn not_found() {
    let res = sloth::get(url("/nope")).send().unwrap();
    assert_eq!(res.status().unwrap(), 404);
}

#[test]
fn connection_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let res = sloth::get(format!("http://127.0.0.1:{}/", port)).send().unwrap();

    let err = res.status().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.io_error().is_some());
}

#[test]
fn bad_url() {
    let err = sloth::get("not a url").send().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = sloth::get("ftp://example.test/").send().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
