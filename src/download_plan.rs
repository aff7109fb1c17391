use crate::client::Client;
use crate::config::{PollSettings, Selection};
use crate::error::{Error, Result};
use crate::http::HttpOps;
use crate::item::RetrievalHandle;
use crate::poller::PollPolicy;
use chrono::Utc;
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DownloadTask {
    item_type: String,
    item_id: String,
    asset: String,
    output: String,
}

impl DownloadTask {
    pub fn new(item_type: &str, item_id: &str, asset: &str, output: &str) -> Self {
        DownloadTask {
            item_type: item_type.to_string(),
            item_id: item_id.to_string(),
            asset: asset.to_string(),
            output: output.to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct DownloadPlan {
    tasks: Vec<DownloadTask>,
    #[serde(default)]
    polling: PollSettings,
}

/// Item ids may carry characters that do not belong in a file name.
fn file_safe(s: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE
        .get_or_init(|| Regex::new(r"[^\w.\-]").expect("Regex pattern should always compile"));
    re.replace_all(s, "_").into_owned()
}

fn output_path(output_dir: &Path, item_id: &str, asset: &str) -> PathBuf {
    let item_dir = file_safe(item_id);
    let file_name = format!("{}_{}", item_dir, file_safe(asset));
    output_dir.join(item_dir).join(file_name)
}

impl DownloadPlan {
    pub fn new(tasks: Vec<DownloadTask>, polling: PollSettings) -> Self {
        Self { tasks, polling }
    }

    pub fn tasks(self: &Self) -> &[DownloadTask] {
        &self.tasks
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// One task per selected item: explicit ids when given, search results otherwise.
    pub async fn from_selection<H: HttpOps>(
        client: &Client<H>,
        selection: &Selection,
        output_dir: &Path,
    ) -> Result<Self> {
        let default_type = selection
            .item_types
            .first()
            .ok_or_else(|| Error::Config("no item_types given".to_string()))?;

        let items: Vec<(String, String)> = match (selection.ids_to_download(), &selection.filter) {
            (Some(ids), _) => ids
                .into_iter()
                .map(|id| (default_type.clone(), id))
                .collect(),
            (None, Some(filter)) => client
                .search(&selection.item_types, filter, selection.limit)
                .await?
                .items
                .into_iter()
                .map(|item| {
                    let item_type = item.item_type().unwrap_or(default_type.as_str()).to_string();
                    (item_type, item.id)
                })
                .collect(),
            (None, None) => {
                return Err(Error::Config(
                    "either a filter or ids_to_download is required".to_string(),
                ))
            }
        };

        let tasks = items
            .iter()
            .map(|(item_type, item_id)| {
                let output = output_path(output_dir, item_id, &selection.asset);
                DownloadTask::new(
                    item_type,
                    item_id,
                    &selection.asset,
                    &output.to_string_lossy(),
                )
            })
            .collect::<Vec<_>>();

        if tasks.is_empty() {
            return Err(Error::NotFound(format!(
                "no items matched selection '{}'",
                selection.name
            )));
        }
        Ok(Self::new(tasks, selection.polling.clone()))
    }

    pub async fn execute<H: HttpOps>(
        self: &Self,
        client: &Client<H>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let policy = PollPolicy::from(&self.polling);
        for task in self.tasks.iter() {
            info!("current task: {:?}", task);
            if Path::new(&task.output).exists() {
                info!("output file already exists");
                continue;
            }
            let handle = client
                .retrieve(&task.item_type, &task.item_id, &task.asset, &policy, cancel)
                .await?;
            client.download(&handle, Path::new(&task.output)).await?;
        }
        Ok(())
    }
}

impl<H: HttpOps> Client<H> {
    pub async fn download(self: &Self, handle: &RetrievalHandle, output: &Path) -> Result<u64> {
        try_download(self.http(), handle, output).await
    }
}

/// Download into `<output>.partial`, resuming where an earlier attempt stopped, then
/// move it into place.
pub async fn try_download<H: HttpOps>(
    http: &H,
    handle: &RetrievalHandle,
    output: &Path,
) -> Result<u64> {
    if output.exists() {
        info!("output file already exists");
        return Ok(fs::metadata(output)?.len());
    }
    if handle.is_expired(Utc::now()) {
        return Err(Error::Expired(handle.asset.clone()));
    }

    if let Some(parent_dir) = output.parent() {
        if !parent_dir.exists() {
            fs::create_dir_all(parent_dir)?;
        }
    }

    let mut partial = output.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let mut partial_file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(&partial)?;
    let byte_count = partial_file.metadata()?.len();
    if byte_count > 0 {
        info!("resuming download of {} at byte {}", handle.asset, byte_count);
    } else {
        info!("downloading {}..", handle.asset);
    }

    let total = http
        .fetch_to_file(handle.url.as_str(), byte_count, &mut partial_file)
        .await?;

    info!("download complete, {} kB", total / 1024);
    fs::rename(partial, output)?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{
        assets_url, descriptor, test_client, ACTIVATE_LINK, BASE, ITEM_ID, LOCATION, SELF_LINK,
    };
    use crate::http::mock::MockHttp;
    use serde_json::{json, Value};
    use url::Url;

    fn handle(expires_in: chrono::Duration) -> RetrievalHandle {
        RetrievalHandle {
            asset: "visual".to_string(),
            url: Url::parse(LOCATION).unwrap(),
            expires_at: Utc::now() + expires_in,
        }
    }

    fn ids_selection() -> Selection {
        toml::from_str(&format!(
            r#"
            name = "by id"
            item_types = ["REOrthoTile"]
            asset = "visual"
            ids_to_download = ["{id}", "{id}"]

            [polling]
            interval_secs = 1
            max_attempts = 3
            "#,
            id = ITEM_ID
        ))
        .unwrap()
    }

    #[test]
    fn test_file_safe() {
        assert_eq!(file_safe("a/b c:d.tif"), "a_b_c_d.tif");
        assert_eq!(file_safe(ITEM_ID), ITEM_ID);
    }

    #[test]
    fn test_write_and_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan").join("download_plan.json");
        let plan = DownloadPlan::new(
            vec![
                DownloadTask::new("PSScene", "a", "ortho_visual", "out/a"),
                DownloadTask::new("PSScene", "b", "ortho_visual", "out/b"),
            ],
            PollSettings::default(),
        );
        plan.write(&path).unwrap();

        let plan = DownloadPlan::read(&path).unwrap();
        assert_eq!(plan.tasks().len(), 2);
        assert_eq!(plan.tasks()[1].item_id, "b");
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("item").join("visual.tif");
        let http = MockHttp::new();
        http.serve_bytes(LOCATION, b"0123456789");

        let n = try_download(&http, &handle(chrono::Duration::minutes(5)), &output)
            .await
            .unwrap();
        assert_eq!(n, 10);
        assert_eq!(fs::read(&output).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_download_resumes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("visual.tif");
        fs::write(dir.path().join("visual.tif.partial"), b"0123").unwrap();
        let http = MockHttp::new();
        http.serve_bytes(LOCATION, b"0123456789");

        try_download(&http, &handle(chrono::Duration::minutes(5)), &output)
            .await
            .unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_expired_handle_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("visual.tif");
        let http = MockHttp::new();
        http.serve_bytes(LOCATION, b"data");

        let err = try_download(&http, &handle(chrono::Duration::seconds(-1)), &output)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Expired(_)));
        assert_eq!(http.calls_to(LOCATION), 0);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_plan_from_ids() {
        let dir = tempfile::tempdir().unwrap();
        let client = test_client(MockHttp::new());
        let plan = DownloadPlan::from_selection(&client, &ids_selection(), dir.path())
            .await
            .unwrap();

        assert_eq!(plan.tasks().len(), 1);
        let expected = dir
            .path()
            .join(ITEM_ID)
            .join(format!("{}_visual", ITEM_ID));
        assert_eq!(plan.tasks()[0].output, expected.to_string_lossy());
    }

    #[tokio::test]
    async fn test_plan_from_empty_search() {
        let dir = tempfile::tempdir().unwrap();
        let http = MockHttp::new();
        http.respond(&format!("{}quick-search", BASE), Ok(json!({"features": []})));
        let client = test_client(http);

        let selection = Selection::template().unwrap();
        let err = DownloadPlan::from_selection(&client, &selection, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_plan() {
        let dir = tempfile::tempdir().unwrap();
        let http = MockHttp::new();
        http.respond(&assets_url(), Ok(json!({"visual": descriptor("inactive")})));
        http.respond(ACTIVATE_LINK, Ok(Value::Null));
        http.respond(SELF_LINK, Ok(descriptor("activating")));
        http.respond(SELF_LINK, Ok(descriptor("active")));
        http.serve_bytes(LOCATION, b"GeoTIFF bytes");
        let client = test_client(http);

        let plan = DownloadPlan::from_selection(&client, &ids_selection(), dir.path())
            .await
            .unwrap();
        plan.execute(&client, &CancellationToken::new())
            .await
            .unwrap();

        let output = PathBuf::from(&plan.tasks()[0].output);
        assert_eq!(fs::read(&output).unwrap(), b"GeoTIFF bytes");
        assert_eq!(client.http().calls_to(ACTIVATE_LINK), 1);
        assert_eq!(client.http().calls_to(SELF_LINK), 2);
    }
}
