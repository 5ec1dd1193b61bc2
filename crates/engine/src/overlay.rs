//! In-page control overlay.
//!
//! A small fixed-position fragment injected into the loaded page: an
//! identity badge naming the replayed session, a devtools toggle, and a
//! close button. Clicks and the escape key call back into the host
//! through the bridge object the driver exposes on `window`.
//!
//! Injection is idempotent. The script always removes a prior node with
//! the same id before inserting, so re-running on every navigation
//! never stacks duplicates.

use crate::bootstrap::js_string;

/// DOM id of the injected overlay root node.
pub const OVERLAY_NODE_ID: &str = "relive-overlay";

/// Name of the bridge object the driver exposes on `window`. Its
/// `closeContext` and `toggleDevTools` methods surface as
/// [`crate::driver::BridgeCommand`]s.
pub const BRIDGE_OBJECT: &str = "__reliveBridge";

/// Builds the overlay injection script for a context labeled `label`
/// (the credential's display name, falling back to its id).
pub fn inject_script(label: &str) -> String {
    format!(
        r#"(() => {{
  const prior = document.getElementById({node_id});
  if (prior) prior.remove();

  const bridge = window.{bridge} || {{}};
  const call = (name) => {{ try {{ if (bridge[name]) bridge[name](); }} catch (e) {{}} }};

  const root = document.createElement('div');
  root.id = {node_id};
  root.style.cssText =
    'position:fixed;top:12px;right:12px;z-index:2147483647;' +
    'display:flex;align-items:center;gap:8px;padding:6px 10px;' +
    'background:rgba(17,17,17,0.85);color:#fff;border-radius:8px;' +
    'font:12px/1.4 system-ui,sans-serif;pointer-events:auto;';

  const badge = document.createElement('span');
  badge.textContent = {label};
  root.appendChild(badge);

  const button = (text, name) => {{
    const b = document.createElement('button');
    b.textContent = text;
    b.style.cssText =
      'border:0;border-radius:4px;padding:2px 8px;cursor:pointer;' +
      'background:#333;color:#fff;font:inherit;';
    b.addEventListener('click', () => call(name));
    return b;
  }};
  root.appendChild(button('devtools', 'toggleDevTools'));
  root.appendChild(button('close', 'closeContext'));

  (document.body || document.documentElement).appendChild(root);

  if (!window.__reliveEscBound) {{
    window.__reliveEscBound = true;
    window.addEventListener('keydown', (e) => {{
      if (e.key === 'Escape') call('closeContext');
    }});
  }}
}})();"#,
        node_id = js_string(OVERLAY_NODE_ID),
        bridge = BRIDGE_OBJECT,
        label = js_string(label),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_removes_prior_node_before_inserting() {
        let script = inject_script("Jo");
        let remove = script.find("prior.remove()").unwrap();
        let insert = script.find("appendChild(root)").unwrap();
        assert!(remove < insert);
    }

    #[test]
    fn script_wires_bridge_calls_and_escape() {
        let script = inject_script("Jo");
        assert!(script.contains("window.__reliveBridge"));
        assert!(script.contains("'toggleDevTools'"));
        assert!(script.contains("'closeContext'"));
        assert!(script.contains("e.key === 'Escape'"));
    }

    #[test]
    fn label_is_escaped() {
        let script = inject_script("Jo's \"shop\"");
        assert!(script.contains(r"badge.textContent = 'Jo\'s"));
    }

    #[test]
    fn escape_listener_binds_once() {
        let script = inject_script("Jo");
        assert!(script.contains("if (!window.__reliveEscBound)"));
    }
}
