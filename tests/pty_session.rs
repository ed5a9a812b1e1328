//! End-to-end controller test against a real child process under a
//! pseudo-terminal.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use viaduct::controller::Controller;
use viaduct::fsm::FsmEvent;
use viaduct::Config;

const SIMULATOR: &str = r#"#!/bin/sh
while true; do
  printf '\r\ndemo-host# '
  read line || exit 0
  if [ "$line" = "show clock" ]; then
    printf '\r\n12:00:00.000 UTC'
  fi
done
"#;

fn write_simulator() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.sh");
    std::fs::write(&path, SIMULATOR).unwrap();
    let command = format!("sh {}", path.display());
    (dir, command)
}

#[tokio::test]
async fn test_spawn_expect_send_close() {
    let (_dir, command) = write_simulator();
    let mut ctrl = Controller::new(Arc::new(Config::default()));
    ctrl.spawn_session(&command).await.unwrap();
    assert!(ctrl.is_alive());

    let prompt = FsmEvent::Pattern(Regex::new("demo-host# ").unwrap());
    ctrl.expect(
        std::slice::from_ref(&prompt),
        Duration::from_secs(10),
        None,
    )
    .await
    .unwrap();

    ctrl.sendline("show clock").await.unwrap();
    ctrl.expect(
        std::slice::from_ref(&prompt),
        Duration::from_secs(10),
        None,
    )
    .await
    .unwrap();
    assert!(
        ctrl.before().contains("12:00:00.000 UTC"),
        "before was: {:?}",
        ctrl.before()
    );

    ctrl.close();
    assert!(!ctrl.is_alive());
}

#[tokio::test]
async fn test_prompt_detection_on_real_pty() {
    let (_dir, command) = write_simulator();
    let mut ctrl = Controller::new(Arc::new(Config::default()));
    ctrl.spawn_session(&command).await.unwrap();

    let prompt = ctrl.detect_prompt().await.unwrap();
    assert_eq!(prompt.as_deref(), Some("demo-host#"));

    ctrl.close();
}
