//! Per-runner append-only run log (§6.4).

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

fn safe_runner_id(runner_id: &str) -> String {
    runner_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

pub fn log_path(log_dir: &Path, runner_id: &str) -> PathBuf {
    log_dir.join(format!("run_{}.log", safe_runner_id(runner_id)))
}

#[allow(clippy::too_many_arguments)]
pub async fn append_run_log(
    log_dir: &Path,
    runner_id: &str,
    runner_name: &str,
    command: &str,
    exit_code: Option<i32>,
    output: &str,
    stopped: bool,
    ts: &str,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(log_dir).await?;
    let path = log_path(log_dir, runner_id);
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;

    let exit_code_display = exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    let mut header = format!(
        "========\ntimestamp: {ts}\nrunner: {runner_name}\ncommand: {command}\nexit_code: {exit_code_display}\nstopped: {stopped}\n--------\n"
    );
    header.push_str(output);
    if !output.ends_with('\n') {
        header.push('\n');
    }
    file.write_all(header.as_bytes()).await?;
    Ok(())
}

pub async fn read_log(log_dir: &Path, runner_id: &str) -> std::io::Result<String> {
    match tokio::fs::read_to_string(log_path(log_dir, runner_id)).await {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

pub async fn clear_log(log_dir: &Path, runner_id: &str) -> std::io::Result<()> {
    let path = log_path(log_dir, runner_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
