#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use runmon_harness::{ControllerConfig, LocalPidRegistry, ProcessController};

pub const PATIENT: Duration = Duration::from_secs(5);

/// Stand-in for the monitored tool: tagged banner, echoes input, exits on
/// `exit` after writing a little more on both streams.
pub const FAKE_TOOL: &str = r#"
echo '[runmon] Started successfully'
echo 'warming up' >&2
while IFS= read -r line; do
  case "$line" in
    exit)
      echo '[runmon] stopping'
      sleep 0.2
      echo 'stderr after exit' >&2
      exit 0
      ;;
    *)
      echo "[runmon] got $line"
      ;;
  esac
done
"#;

pub fn controller() -> (ProcessController, Arc<LocalPidRegistry>) {
    controller_with(ControllerConfig::default())
}

pub fn controller_with(config: ControllerConfig) -> (ProcessController, Arc<LocalPidRegistry>) {
    let registry = Arc::new(LocalPidRegistry::default());
    let ctl = ProcessController::new(config).with_registry(registry.clone());
    (ctl, registry)
}

pub fn spawn_script(script: &str) -> (ProcessController, Arc<LocalPidRegistry>) {
    let (mut ctl, registry) = controller();
    ctl.spawn_command_line(script).unwrap();
    (ctl, registry)
}
