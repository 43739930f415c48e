//! Student roster lookup.
//!
//! The roster is a static JSON file, read-only, fetched over HTTP or from disk,
//! raced against a timeout and cached for a fixed TTL.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::RosterConfig;
use crate::error::{BoardError, BoardResult};
use crate::normalize::text;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub name: String,
    pub student_id: String,
    pub class_name: Option<String>,
}

/// Path of `file` as seen from `page_path`, one `../` per directory level.
pub fn resolve_roster_path(page_path: &str, file: &str) -> String {
    let trimmed = page_path.trim().trim_start_matches('/');
    let depth = if trimmed.is_empty() {
        0
    } else {
        trimmed.split('/').count() - 1
    };
    format!("{}{}", "../".repeat(depth), file.trim_start_matches('/'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterLocation {
    Remote(Url),
    Local(PathBuf),
}

impl RosterLocation {
    pub fn resolve(config: &RosterConfig) -> BoardResult<Self> {
        if is_http(&config.file) {
            return Url::parse(&config.file)
                .map(Self::Remote)
                .map_err(|err| BoardError::Validation(format!("bad roster url: {err}")));
        }

        let relative = resolve_roster_path(&config.page_path, &config.file);
        let page = config.page_path.trim().trim_start_matches('/');
        match config.site_root.as_deref() {
            Some(root) if is_http(root) => {
                let base = Url::parse(root)
                    .and_then(|root| root.join(page))
                    .map_err(|err| BoardError::Validation(format!("bad site root: {err}")))?;
                base.join(&relative)
                    .map(Self::Remote)
                    .map_err(|err| BoardError::Validation(format!("bad roster path: {err}")))
            }
            root => {
                let page_dir = Path::new(page).parent().unwrap_or(Path::new(""));
                let path = lexical_join(&page_dir.join(&relative));
                Ok(Self::Local(Path::new(root.unwrap_or(".")).join(path)))
            }
        }
    }
}

fn is_http(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Resolves `..` segments without touching the filesystem; never climbs above the root.
fn lexical_join(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Accepts a bare array of students or an object wrapping one.
pub fn parse_roster(value: Value) -> BoardResult<Vec<Student>> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut map) => {
            let key = if map.get("students").is_some_and(Value::is_array) {
                Some("students".to_string())
            } else {
                map.iter()
                    .find(|(_, value)| value.is_array())
                    .map(|(key, _)| key.clone())
            };
            match key.and_then(|key| map.remove(&key)) {
                Some(Value::Array(entries)) => entries,
                _ => {
                    return Err(BoardError::LookupFailed(
                        "roster object holds no student array".to_string(),
                    ));
                }
            }
        }
        _ => {
            return Err(BoardError::LookupFailed(
                "roster is neither an array nor an object".to_string(),
            ));
        }
    };

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let name = text(entry.get("name"))?;
            let student_id = ["studentId", "id", "student_id"]
                .iter()
                .find_map(|key| text(entry.get(*key)))?;
            let class_name = ["class", "className"]
                .iter()
                .find_map(|key| text(entry.get(*key)));
            Some(Student {
                name,
                student_id,
                class_name,
            })
        })
        .collect())
}

struct CachedRoster {
    fetched_at: Instant,
    students: Arc<Vec<Student>>,
}

pub struct RosterClient {
    location: RosterLocation,
    timeout: Duration,
    ttl: Duration,
    http: reqwest::Client,
    cache: Mutex<Option<CachedRoster>>,
}

impl RosterClient {
    pub fn new(location: RosterLocation, timeout: Duration, ttl: Duration) -> Self {
        Self {
            location,
            timeout,
            ttl,
            http: reqwest::Client::new(),
            cache: Mutex::new(None),
        }
    }

    pub fn from_config(config: &RosterConfig) -> BoardResult<Self> {
        Ok(Self::new(
            RosterLocation::resolve(config)?,
            Duration::from_millis(config.timeout_ms),
            Duration::from_secs(config.ttl_secs),
        ))
    }

    pub fn location(&self) -> &RosterLocation {
        &self.location
    }

    /// Looks for an exact name + id match.
    pub async fn validate_student(
        &self,
        name: &str,
        student_id: &str,
    ) -> BoardResult<Option<Student>> {
        let (name, student_id) = (name.trim(), student_id.trim());
        if name.is_empty() || student_id.is_empty() {
            return Err(BoardError::Validation(
                "name and student id are both required".to_string(),
            ));
        }
        let students = self.students().await?;
        Ok(students
            .iter()
            .find(|student| student.name == name && student.student_id == student_id)
            .cloned())
    }

    /// Roster contents, from cache while younger than the TTL.
    pub async fn students(&self) -> BoardResult<Arc<Vec<Student>>> {
        if let Some(students) = self.cached() {
            return Ok(students);
        }
        let students = Arc::new(self.fetch().await?);
        log::info!("Loaded roster with {} students", students.len());
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedRoster {
            fetched_at: Instant::now(),
            students: Arc::clone(&students),
        });
        Ok(students)
    }

    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cached(&self) -> Option<Arc<Vec<Student>>> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.students))
    }

    async fn fetch(&self) -> BoardResult<Vec<Student>> {
        let body = match tokio::time::timeout(self.timeout, self.read_body()).await {
            Ok(body) => body?,
            Err(_) => {
                log::warn!("Roster fetch from {:?} timed out", self.location);
                return Err(BoardError::Timeout(self.timeout.as_millis() as u64));
            }
        };
        let value: Value = serde_json::from_str(&body)
            .map_err(|err| BoardError::LookupFailed(format!("roster is not JSON: {err}")))?;
        parse_roster(value)
    }

    async fn read_body(&self) -> BoardResult<String> {
        let lookup = |err: reqwest::Error| BoardError::LookupFailed(err.to_string());
        match &self.location {
            RosterLocation::Remote(url) => {
                let response = self.http.get(url.clone()).send().await.map_err(lookup)?;
                response
                    .error_for_status()
                    .map_err(lookup)?
                    .text()
                    .await
                    .map_err(lookup)
            }
            RosterLocation::Local(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|err| BoardError::LookupFailed(format!("{}: {err}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn write_roster(root: &Path, body: &str) {
        let dir = root.join("assets/data");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("students.json"), body).unwrap();
    }

    fn local_config(root: &Path) -> RosterConfig {
        RosterConfig {
            site_root: Some(root.to_string_lossy().into_owned()),
            page_path: "/admin/index.html".to_string(),
            ..RosterConfig::default()
        }
    }

    #[test]
    fn path_depth_follows_page() {
        assert_eq!(
            resolve_roster_path("/index.html", "assets/data/students.json"),
            "assets/data/students.json"
        );
        assert_eq!(
            resolve_roster_path("/admin/index.html", "assets/data/students.json"),
            "../assets/data/students.json"
        );
        assert_eq!(resolve_roster_path("/a/b/", "s.json"), "../../s.json");
        assert_eq!(resolve_roster_path("", "s.json"), "s.json");
    }

    #[test]
    fn remote_site_root_is_joined_against_the_page() {
        let config = RosterConfig {
            site_root: Some("https://school.example/board/".to_string()),
            page_path: "/admin/replies.html".to_string(),
            ..RosterConfig::default()
        };
        let location = RosterLocation::resolve(&config).unwrap();
        assert_eq!(
            location,
            RosterLocation::Remote(
                Url::parse("https://school.example/board/assets/data/students.json").unwrap()
            )
        );
    }

    #[test]
    fn bare_and_wrapped_rosters_parse() {
        let bare = parse_roster(json!([
            {"name": "Li Lei", "studentId": 2023001, "class": "C1"},
            {"name": "No Id"}
        ]))
        .unwrap();
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].student_id, "2023001");

        let wrapped = parse_roster(json!({"version": 2, "students": [
            {"name": "Han Meimei", "id": "2023002", "className": "C2"}
        ]}))
        .unwrap();
        assert_eq!(wrapped[0].class_name.as_deref(), Some("C2"));

        assert!(parse_roster(json!("nope")).is_err());
        assert!(parse_roster(json!({"count": 3})).is_err());
    }

    #[tokio::test]
    async fn local_roster_validates_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        write_roster(
            dir.path(),
            r#"[{"name":"Li Lei","studentId":"2023001","class":"C1"}]"#,
        );
        let client = RosterClient::from_config(&local_config(dir.path())).unwrap();

        let found = client.validate_student(" Li Lei ", "2023001").await.unwrap();
        assert_eq!(found.unwrap().class_name.as_deref(), Some("C1"));
        assert!(client.validate_student("Li Lei", "999").await.unwrap().is_none());

        std::fs::remove_file(dir.path().join("assets/data/students.json")).unwrap();
        assert!(client.validate_student("Li Lei", "2023001").await.unwrap().is_some());

        client.invalidate();
        let err = client.validate_student("Li Lei", "2023001").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LookupFailed);
    }

    #[tokio::test]
    async fn blank_identity_is_rejected_before_fetching() {
        let client = RosterClient::new(
            RosterLocation::Local(PathBuf::from("/nonexistent/students.json")),
            Duration::from_millis(100),
            Duration::from_secs(60),
        );
        let err = client.validate_student("", "1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn http_roster_is_fetched() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let body = r#"{"students":[{"name":"Li Lei","studentId":"2023001"}]}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let url = Url::parse(&format!("http://{addr}/assets/data/students.json")).unwrap();
        let client = RosterClient::new(
            RosterLocation::Remote(url),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        let student = client.validate_student("Li Lei", "2023001").await.unwrap();
        assert!(student.is_some());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let url = Url::parse(&format!("http://{addr}/students.json")).unwrap();
        let client = RosterClient::new(
            RosterLocation::Remote(url),
            Duration::from_millis(150),
            Duration::from_secs(60),
        );
        let err = client.students().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
