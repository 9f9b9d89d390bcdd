//! Shell-based MCP server stub shared by downstream and proxy tests.

use crate::downstream::DownstreamConfig;

/// Line-oriented responder covering initialize, tools/list, and
/// tools/call, echoing the caller's id so correlation is exercised for
/// real.
pub(crate) fn stub_script() -> &'static str {
    r#"while read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub","version":"0"}}}\n' "$id" ;;
    *'"tools/list"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"foo"}]}}\n' "$id" ;;
    *'"tools/call"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok-from-stub"}]}}\n' "$id" ;;
    *) : ;;
  esac
done"#
}

/// A downstream config running the stub under `sh`.
pub(crate) fn stub_config(id: &str) -> DownstreamConfig {
    DownstreamConfig {
        id: id.into(),
        command: "sh".into(),
        args: vec!["-c".into(), stub_script().into()],
    }
}
