//! Scripted mock tool providers.
//!
//! Each mock is a small POSIX shell script written to a temp directory and
//! spawned by the real `ToolClient`, so integration tests exercise the
//! actual subprocess transport: spawn, handshake, per-call envelopes, and
//! the zero-length shutdown terminator.

use std::io::Write;
use std::path::{Path, PathBuf};

/// How a scripted provider behaves after launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockToolBehavior {
    /// Answers the handshake and every call with canned evidence.
    Healthy,
    /// Exits immediately; the client observes EOF and fails.
    Failing,
    /// Answers the handshake, then goes silent; calls hit their deadlines.
    Unresponsive,
}

/// The healthy provider: parses the request id with shell parameter
/// expansion (the envelope always leads with `"id":N`) and keys the canned
/// result on a method-name substring.
const HEALTHY_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  [ -z "$line" ] && exit 0
  rid=${line#*\"id\":}
  rid=${rid%%,*}
  rid=${rid%%\}*}
  case "$line" in
    *'"method":"listTools"'*)
      printf '{"id":%s,"result":{"tools":[{"name":"searchLiterature"},{"name":"searchGuidelines"},{"name":"getCitations"},{"name":"searchTrials"},{"name":"checkDrugInteractions"},{"name":"analyzeImage"}]}}\n' "$rid"
      ;;
    *'"method":"searchLiterature"'*)
      printf '{"id":%s,"result":{"articles":[{"title":"Scripted literature evidence"}]}}\n' "$rid"
      ;;
    *'"method":"searchGuidelines"'*)
      printf '{"id":%s,"result":{"guidelines":[{"title":"Scripted guideline"}]}}\n' "$rid"
      ;;
    *'"method":"getCitations"'*)
      printf '{"id":%s,"result":{"citations":[{"title":"Scripted citation"}]}}\n' "$rid"
      ;;
    *'"method":"searchTrials"'*)
      printf '{"id":%s,"result":{"trials":[{"title":"Scripted trial"}]}}\n' "$rid"
      ;;
    *'"method":"checkDrugInteractions"'*)
      printf '{"id":%s,"result":{"interactions":[{"title":"Scripted interaction"}]}}\n' "$rid"
      ;;
    *'"method":"analyzeImage"'*)
      printf '{"id":%s,"result":{"findings":[{"title":"Scripted imaging finding"}]}}\n' "$rid"
      ;;
    *)
      printf '{"id":%s,"result":{}}\n' "$rid"
      ;;
  esac
done
"#;

const FAILING_SCRIPT: &str = "#!/bin/sh\nexit 1\n";

const UNRESPONSIVE_SCRIPT: &str = r#"#!/bin/sh
replied=0
while IFS= read -r line; do
  [ -z "$line" ] && exit 0
  rid=${line#*\"id\":}
  rid=${rid%%,*}
  rid=${rid%%\}*}
  if [ "$replied" -eq 0 ]; then
    replied=1
    printf '{"id":%s,"result":{"tools":[{"name":"searchLiterature"}]}}\n' "$rid"
  fi
done
"#;

/// Write the script for `behavior` into `dir` and return its path, marked
/// executable.
pub fn write_mock_tool(
    dir: &Path,
    name: &str,
    behavior: MockToolBehavior,
) -> anyhow::Result<PathBuf> {
    let script = match behavior {
        MockToolBehavior::Healthy => HEALTHY_SCRIPT,
        MockToolBehavior::Failing => FAILING_SCRIPT,
        MockToolBehavior::Unresponsive => UNRESPONSIVE_SCRIPT,
    };

    let path = dir.join(format!("mock-{name}.sh"));
    let mut file = std::fs::File::create(&path)?;
    file.write_all(script.as_bytes())?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(path)
}
