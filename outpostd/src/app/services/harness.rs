// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! The shell program a job workload runs: wait for its own server to report
//! running, execute every notebook below the requested directories with
//! papermill, print a JSON summary between two sentinel lines.

pub const JOB_STARTED_SENTINEL: &str = "Papermill Job started";
pub const JOB_COMPLETED_SENTINEL: &str = "Papermill Job completed";

const READINESS_WAIT: &str = r#"set -euo pipefail

if ! command -v papermill >/dev/null 2>&1; then
    python3 -m pip install --user papermill >/dev/null 2>&1 || {
        echo "$(date) - pip install papermill failed" >&2
        exit 1
    }
    export PAPERMILL="${HOME}/.local/bin/papermill"
else
    export PAPERMILL="$(command -v papermill)"
fi

SERVER_LOG=$(mktemp)
READY_TIMEOUT=60
READY_INTERVAL=1
JOB_PREFIX="${JUPYTERHUB_SERVICE_PREFIX/\/user\//\/job\/}"
JOB_PREFIX="${JOB_PREFIX%/}"
STATUS_URL="${JUPYTERHUB_API_URL}${JOB_PREFIX}?delete=false"
jupyterhub-singleuser > "$SERVER_LOG" 2>&1 &

waited=0
while true; do
    STATUS=$(curl -ks -H "Authorization: token ${JUPYTERHUB_API_TOKEN}" "$STATUS_URL" \
        | sed 's/.*"status":[ ]*"\([^"]*\)".*/\1/')
    case "$STATUS" in
        running)
            break
            ;;
        stopped)
            echo "$(date) - Server stopped unexpectedly"
            [ -f "$SERVER_LOG" ] && cat "$SERVER_LOG" >&2
            exit 1
            ;;
        *)
            sleep "$READY_INTERVAL"
            ;;
    esac
    waited=$((waited + READY_INTERVAL))
    if [ "$waited" -ge "$READY_TIMEOUT" ]; then
        echo "$(date) - Timeout waiting for server to be ready" >&2
        [ -f "$SERVER_LOG" ] && cat "$SERVER_LOG" >&2
        exit 2
    fi
done
"#;

/// Reads the directory list from `NOTEBOOK_DIRS` (a JSON list or string).
const NOTEBOOK_RUNNER: &str = r#"import json, os, pathlib, subprocess, sys, tempfile

home = os.environ.get("HOME", "/home/jovyan")
papermill = os.environ.get("PAPERMILL", home + "/.local/bin/papermill")
dirs = json.loads(os.environ.get("NOTEBOOK_DIRS") or "[]")
if isinstance(dirs, str):
    dirs = [dirs]
if not dirs:
    dirs = [home]

results = []
overall = 0
seen = set()
for entry in dirs:
    root = pathlib.Path(entry)
    if not root.resolve().is_dir():
        results.append({
            "notebook": entry,
            "exitCode": -1,
            "stdout": "Directory %s does not exist or is not a directory" % entry,
        })
        overall = 1
        continue
    notebooks = sorted(p for p in root.rglob("*.ipynb") if ".ipynb_checkpoints" not in p.parts)
    for nb in notebooks:
        try:
            resolved = nb.resolve()
            if resolved in seen:
                continue
            seen.add(resolved)
            target = pathlib.Path(tempfile.mkdtemp()) / nb.name
            proc = subprocess.run([papermill, str(nb), str(target)], capture_output=True, text=True)
            if proc.returncode != 0:
                overall = 1
            results.append({
                "notebook": str(nb),
                "exitCode": proc.returncode,
                "stdout": proc.stdout + proc.stderr,
            })
        except Exception as err:
            results.append({"notebook": str(nb), "exitCode": -1, "stdout": str(err)})

json.dump({"exitCode": overall, "results": results}, sys.stdout, indent=2)
"#;

fn shell_quote(value: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&value.replace('\'', r"'\''"));
    out.push('\'');
    out
}

pub fn render_script(notebook_dirs: &[String]) -> String {
    let dirs = serde_json::to_string(notebook_dirs).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{READINESS_WAIT}\necho \"\"\necho \"{JOB_STARTED_SENTINEL}\"\n\
         export NOTEBOOK_DIRS={dirs}\n\
         python3 - <<'NOTEBOOK_RUNNER'\n{NOTEBOOK_RUNNER}NOTEBOOK_RUNNER\n\
         echo \"\"\necho \"{JOB_COMPLETED_SENTINEL}\"\n",
        dirs = shell_quote(&dirs),
    )
}

/// Lines strictly between the two sentinels, or nothing when the start
/// sentinel never appeared.
pub fn reduce_logs(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .skip_while(|line| line.as_str() != JOB_STARTED_SENTINEL)
        .skip(1)
        .take_while(|line| line.as_str() != JOB_COMPLETED_SENTINEL)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;

    #[derive(Debug, Deserialize)]
    struct JobSummary {
        #[serde(rename = "exitCode")]
        exit_code: i32,
        results: Vec<NotebookResult>,
    }

    #[derive(Debug, Deserialize)]
    struct NotebookResult {
        notebook: String,
        #[serde(rename = "exitCode")]
        exit_code: i32,
        stdout: String,
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reduce_logs_keeps_lines_between_sentinels() {
        let logs = lines(&["x", JOB_STARTED_SENTINEL, "a", "b", JOB_COMPLETED_SENTINEL]);
        assert_eq!(reduce_logs(&logs), lines(&["a", "b"]));
    }

    #[test]
    fn reduce_logs_without_start_is_empty() {
        let logs = lines(&["x", "y", JOB_COMPLETED_SENTINEL]);
        assert!(reduce_logs(&logs).is_empty());
    }

    #[test]
    fn script_quotes_directories() {
        let script = render_script(&["/home/it's here".to_string()]);
        assert!(script.contains(r#"export NOTEBOOK_DIRS='["/home/it'\''s here"]'"#));
        assert!(script.contains("<<'NOTEBOOK_RUNNER'"));
        let started = script.find(JOB_STARTED_SENTINEL).unwrap();
        let completed = script.find(JOB_COMPLETED_SENTINEL).unwrap();
        assert!(started < completed);
        assert!(script.contains("?delete=false"));
    }

    fn python_available() -> bool {
        let found = Command::new("python3").arg("--version").output().is_ok();
        if !found {
            eprintln!("python3 not available, skipping");
        }
        found
    }

    fn fake_papermill(dir: &Path, body: &str) -> PathBuf {
        let papermill = dir.join("papermill");
        fs::write(&papermill, format!("#!/bin/sh\n{body}")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&papermill, fs::Permissions::from_mode(0o755)).unwrap();
        }
        papermill
    }

    fn run_notebooks(home: &Path, papermill: &Path, dirs: &[PathBuf]) -> JobSummary {
        let dirs: Vec<String> = dirs
            .iter()
            .map(|dir| dir.to_string_lossy().into_owned())
            .collect();
        let output = Command::new("python3")
            .arg("-c")
            .arg(NOTEBOOK_RUNNER)
            .env("PAPERMILL", papermill)
            .env("HOME", home)
            .env("NOTEBOOK_DIRS", serde_json::to_string(&dirs).unwrap())
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        serde_json::from_slice(&output.stdout).unwrap()
    }

    #[test]
    fn runner_executes_each_notebook_once() {
        if !python_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        fs::create_dir_all(work.join("nested/.ipynb_checkpoints")).unwrap();
        fs::write(work.join("a.ipynb"), "{}").unwrap();
        fs::write(work.join("nested/b.ipynb"), "{}").unwrap();
        fs::write(work.join("nested/.ipynb_checkpoints/b-checkpoint.ipynb"), "{}").unwrap();
        let papermill = fake_papermill(tmp.path(), "cp \"$1\" \"$2\"\necho ran \"$1\"\n");

        let summary = run_notebooks(
            tmp.path(),
            &papermill,
            &[work.clone(), work, tmp.path().join("missing")],
        );
        assert_eq!(summary.exit_code, 1);
        assert_eq!(summary.results.len(), 3);
        assert!(summary.results[0].notebook.ends_with("a.ipynb"));
        assert!(summary.results[1].notebook.ends_with("nested/b.ipynb"));
        assert_eq!(summary.results[0].exit_code, 0);
        assert_eq!(summary.results[2].exit_code, -1);
    }

    #[test]
    fn failing_notebook_fails_the_summary() {
        if !python_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("a.ipynb"), "{}").unwrap();
        fs::write(work.join("b.ipynb"), "{}").unwrap();
        let papermill = fake_papermill(
            tmp.path(),
            "case \"$1\" in\n    *b.ipynb) echo \"cell raised\" >&2; exit 1 ;;\nesac\ncp \"$1\" \"$2\"\n",
        );

        let summary = run_notebooks(tmp.path(), &papermill, &[work]);
        assert_eq!(summary.exit_code, 1);
        assert_eq!(summary.results.len(), 2);
        let failed: Vec<&NotebookResult> =
            summary.results.iter().filter(|r| r.exit_code != 0).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].notebook.ends_with("b.ipynb"));
        assert_eq!(failed[0].exit_code, 1);
        assert!(failed[0].stdout.contains("cell raised"));
    }
}
