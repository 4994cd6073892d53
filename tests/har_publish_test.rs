//! End-to-end: HAR capture in, Micropub entries out, against a mock site.

use std::io::Write;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use ig_micropub::extract::{filter_by_date, order_oldest_first, DateRange};
use ig_micropub::micropub::{MicropubSite, PublishJob, PublishStep};
use ig_micropub::pipeline::{collect_records, run_jobs, RunMode};
use ig_micropub::sources::ArchiveSource;
use ig_micropub::transport::HttpTransport;

fn node(code: &str, taken_at: i64, images: &[String]) -> Value {
    let carousel: Vec<Value> = images
        .iter()
        .map(|url| json!({"image_versions2": {"candidates": [{"url": url}]}}))
        .collect();
    json!({
        "code": code,
        "taken_at": taken_at,
        "caption": {"text": format!("caption for {code}"), "created_at": taken_at},
        "carousel_media": carousel
    })
}

/// A response body listing nodes the way feed responses do.
fn feed(nodes: Vec<Value>) -> Value {
    let edges: Vec<Value> = nodes.into_iter().map(|n| json!({"node": n})).collect();
    json!({"data": {"user": {"edge_owner_to_timeline_media": {"edges": edges}}}})
}

fn write_har(bodies: &[Value]) -> tempfile::NamedTempFile {
    let entries: Vec<Value> = bodies
        .iter()
        .map(|body| {
            json!({
                "request": {"method": "GET", "url": "https://www.instagram.com/api/v1/feed/"},
                "response": {"status": 200, "content": {
                    "mimeType": "application/json; charset=utf-8",
                    "text": body.to_string()
                }}
            })
        })
        .collect();
    let har = json!({"log": {"version": "1.2", "entries": entries}});

    let mut file = tempfile::Builder::new().suffix(".har").tempfile().unwrap();
    file.write_all(har.to_string().as_bytes()).unwrap();
    file
}

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/micropub"))
        .and(query_param("q", "config"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "media-endpoint": format!("{}/media", server.uri()),
            "syndicate-to": []
        })))
        .mount(server)
        .await;

    for name in ["a1", "a2", "b1"] {
        Mock::given(method("GET"))
            .and(path(format!("/cdn/{name}.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(name.as_bytes().to_vec()))
            .mount(server)
            .await;
    }
}

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(10)).unwrap()
}

#[tokio::test]
async fn test_har_capture_published_oldest_first() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let uri = server.uri();
    Mock::given(method("POST"))
        .and(path("/media"))
        .and(header(
            "Content-Type",
            "multipart/form-data; boundary=________ThIs_Is_tHe_bouNdaRY_$",
        ))
        .respond_with(|req: &Request| {
            let body = String::from_utf8_lossy(&req.body);
            let name = ["a1", "a2", "b1"]
                .into_iter()
                .find(|n| body.contains(&format!("filename=\"{n}.jpg\"")))
                .unwrap_or("unknown");
            ResponseTemplate::new(201).insert_header("Location", format!("/files/{name}.jpg"))
        })
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/micropub"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .respond_with(ResponseTemplate::new(201).insert_header("Location", "/entries/new"))
        .expect(2)
        .mount(&server)
        .await;

    // 2023-11-14 and 2023-11-10, plus one outside the range and a duplicate.
    let newer = node("NEWER", 1_700_000_000, &[format!("{uri}/cdn/a1.jpg"), format!("{uri}/cdn/a2.jpg")]);
    let older = node("OLDER", 1_699_600_000, &[format!("{uri}/cdn/b1.jpg")]);
    let outside = node("OUTSIDE", 1_690_000_000, &[format!("{uri}/cdn/b1.jpg")]);
    let har = write_har(&[
        feed(vec![newer.clone(), outside]),
        feed(vec![older, newer]),
    ]);

    let transport = transport();
    let source = ArchiveSource::from_path(har.path());
    let records = collect_records(&source, &transport).await.unwrap();

    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2023, 11, 1).unwrap(),
        NaiveDate::from_ymd_opt(2023, 11, 30).unwrap(),
    )
    .unwrap();
    let mut records = filter_by_date(records, &range);
    order_oldest_first(&mut records);
    let codes: Vec<&str> = records.iter().map(|r| r.code.as_str()).collect();
    assert_eq!(codes, vec!["OLDER", "NEWER"]);

    let site = MicropubSite::connect(&format!("{uri}/micropub"), "secret", &transport)
        .await
        .unwrap();
    let jobs = records
        .into_iter()
        .map(|r| PublishJob::new(r, false))
        .collect();
    let report = run_jobs(&site, jobs, RunMode::Commit).await;

    assert!(!report.has_failures(), "{:?}", report.failures);
    assert_eq!(report.published.len(), 2);
    assert_eq!(report.published[0].0, "OLDER");
    assert_eq!(report.published[0].1, format!("{uri}/entries/new"));

    let requests = server.received_requests().await.unwrap();
    let entries: Vec<Vec<(String, String)>> = requests
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/micropub")
        .map(|r| url::form_urlencoded::parse(&r.body).into_owned().collect())
        .collect();
    assert_eq!(entries.len(), 2);

    let newer_entry = &entries[1];
    assert!(newer_entry.contains(&("photo".to_string(), format!("{uri}/files/a1.jpg"))));
    assert!(newer_entry.contains(&(
        "content".to_string(),
        format!("caption for NEWER\n\n![]({uri}/files/a2.jpg)")
    )));
    assert!(newer_entry.contains(&(
        "syndication".to_string(),
        "https://www.instagram.com/p/NEWER/".to_string()
    )));
    assert!(newer_entry.contains(&("published".to_string(), "2023-11-14T22:13:20Z".to_string())));
    assert!(!newer_entry.iter().any(|(k, _)| k == "mp-syndicate-to"));
}

#[tokio::test]
async fn test_rejected_upload_aborts_only_that_post() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let uri = server.uri();

    Mock::given(method("POST"))
        .and(path("/media"))
        .and(body_string_contains("filename=\"a1.jpg\""))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/media"))
        .and(body_string_contains("filename=\"b1.jpg\""))
        .respond_with(ResponseTemplate::new(201).insert_header("Location", "/files/b1.jpg"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/micropub"))
        .and(body_string_contains("syndicate"))
        .respond_with(ResponseTemplate::new(201).insert_header("Location", "/entries/b"))
        .expect(1)
        .mount(&server)
        .await;

    let har = write_har(&[feed(vec![
        node("A", 1_700_000_000, &[format!("{uri}/cdn/a1.jpg"), format!("{uri}/cdn/a2.jpg")]),
        node("B", 1_700_000_100, &[format!("{uri}/cdn/b1.jpg")]),
    ])]);

    let transport = transport();
    let records = collect_records(&ArchiveSource::from_path(har.path()), &transport)
        .await
        .unwrap();
    let site = MicropubSite::new(&format!("{uri}/micropub"), "secret", &transport).unwrap();
    let jobs = records.into_iter().map(|r| PublishJob::new(r, true)).collect();
    let report = run_jobs(&site, jobs, RunMode::Commit).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].code, "A");
    assert_eq!(report.failures[0].step, PublishStep::MediaUpload);
    assert!(report.failures[0].reason.contains("403"));
    assert_eq!(report.published, vec![("B".to_string(), format!("{uri}/entries/b"))]);

    // The second image of the failed post was never downloaded.
    let requests = server.received_requests().await.unwrap();
    assert!(!requests.iter().any(|r| r.url.path() == "/cdn/a2.jpg"));

    // Syndication fell back to the default targets.
    let entry = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.path() == "/micropub")
        .unwrap();
    let form: Vec<(String, String)> = url::form_urlencoded::parse(&entry.body).into_owned().collect();
    let targets: Vec<&str> = form
        .iter()
        .filter(|(k, _)| k == "mp-syndicate-to")
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(targets, vec!["twitter", "mastodon"]);
}

#[tokio::test]
async fn test_dry_run_sends_no_posts() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let uri = server.uri();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let har = write_har(&[feed(vec![node("A", 1_700_000_000, &[format!("{uri}/cdn/a1.jpg")])])]);

    let transport = transport();
    let records = collect_records(&ArchiveSource::from_path(har.path()), &transport)
        .await
        .unwrap();
    let site = MicropubSite::new(&format!("{uri}/micropub"), "secret", &transport).unwrap();
    let jobs = records.into_iter().map(|r| PublishJob::new(r, false)).collect();
    let report = run_jobs(&site, jobs, RunMode::DryRun).await;

    assert_eq!(report.previewed, vec!["A"]);
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_missing_media_endpoint_fails_to_connect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/micropub"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"syndicate-to": []})))
        .mount(&server)
        .await;

    let transport = transport();
    let result = MicropubSite::connect(&format!("{}/micropub", server.uri()), "secret", &transport).await;
    assert!(result.is_err());
}
