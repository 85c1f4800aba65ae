use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn chx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("chx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let repo = root.join("backend");
    fs::create_dir_all(repo.join("src/auth")).unwrap();
    fs::create_dir_all(repo.join("node_modules/left-pad")).unwrap();
    fs::write(
        repo.join("src/handlers.py"),
        "def refresh_session(user):\n    return issue_token(user)\n\n\nclass SessionStore:\n    def evict(self, key):\n        pass\n",
    )
    .unwrap();
    fs::write(
        repo.join("src/auth/keys.py"),
        "def rotate_signing_keys():\n    return load_vault_secret()\n",
    )
    .unwrap();
    fs::write(
        repo.join("node_modules/left-pad/index.js"),
        "function rotate_signing_keys() { return 1; }\n",
    )
    .unwrap();
    fs::write(
        repo.join("README.md"),
        "# Backend\n\nSession handling lives in src.\n\n## Deploy\n\nRun the container.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/chx.sqlite"

[indexing]
workers = 2

[embedding]
provider = "hash"
dims = 64

[[auth.tokens]]
token = "guest-token"
subject = "guest"
role = "viewer"
"#,
        root.display()
    );

    let config_path = config_dir.join("chx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_chx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = chx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run chx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn add_backend(config_path: &Path) {
    let repo = config_path.parent().unwrap().parent().unwrap().join("backend");
    let (stdout, stderr, success) = run_chx(
        config_path,
        &[
            "repo",
            "add",
            "backend",
            repo.to_str().unwrap(),
            "--access",
            "src/auth/**=restricted",
        ],
    );
    assert!(success, "repo add failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_chx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_chx(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_repo_add_indexes_and_lists() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);
    add_backend(&config_path);

    let (stdout, _, success) = run_chx(&config_path, &["repo", "list", "--json"]);
    assert!(success);
    let repos: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let repo = &repos[0];
    assert_eq!(repo["id"], "backend");
    assert_eq!(repo["status"], "ACTIVE");
    // handlers.py, keys.py, README.md; node_modules is ignored by default
    assert_eq!(repo["file_count"], 3);
    assert!(repo["chunk_count"].as_u64().unwrap() >= 4);
}

#[test]
fn test_duplicate_registration_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);
    add_backend(&config_path);

    let repo = config_path.parent().unwrap().parent().unwrap().join("backend");
    let (_, stderr, success) = run_chx(
        &config_path,
        &["repo", "add", "backend", repo.to_str().unwrap(), "--no-index"],
    );
    assert!(!success);
    assert!(stderr.contains("already exists"), "stderr={}", stderr);
}

#[test]
fn test_search_respects_role() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);
    add_backend(&config_path);

    let (stdout, _, success) = run_chx(
        &config_path,
        &["search", "rotate_signing_keys", "--repo", "backend", "--json"],
    );
    assert!(success);
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let paths: Vec<&str> = results
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["chunk"]["source_path"].as_str().unwrap())
        .collect();
    assert!(paths.contains(&"src/auth/keys.py"));
    assert!(!paths.iter().any(|p| p.starts_with("node_modules")));

    let (stdout, _, success) = run_chx(
        &config_path,
        &["--token", "guest-token", "search", "rotate_signing_keys", "--json"],
    );
    assert!(success);
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(results
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["chunk"]["access_group"] == "PUBLIC"));
}

#[test]
fn test_unknown_token_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);

    let (_, _, success) = run_chx(&config_path, &["--token", "nope", "repo", "list"]);
    assert!(!success);
}

#[test]
fn test_get_chunk_and_remove_repo() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);
    add_backend(&config_path);

    let (stdout, _, _) = run_chx(&config_path, &["search", "refresh_session", "--json"]);
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let id = results[0]["chunk_id"].as_str().unwrap().to_string();

    let (stdout, stderr, success) = run_chx(&config_path, &["get", &id]);
    assert!(success, "get failed: stderr={}", stderr);
    assert!(stdout.contains("--- Chunk ---"));
    assert!(stdout.contains(&id));

    let (_, _, success) = run_chx(&config_path, &["repo", "remove", "backend"]);
    assert!(success);
    let (_, _, success) = run_chx(&config_path, &["get", &id]);
    assert!(!success);

    let (stdout, _, _) = run_chx(&config_path, &["repo", "list"]);
    assert!(stdout.contains("No repositories registered."));
}
