//! Page-side expressions evaluated through `Runtime.evaluate`.
//!
//! Every expression starts with a `/* tabpilot:<kind> */` tag so a failing
//! evaluation can be attributed in logs. Caller-provided strings are embedded
//! as JSON literals, never spliced raw.

use serde_json::Value;

const TAG_PREFIX: &str = "/* tabpilot:";

/// Encodes `s` as a JavaScript string literal.
pub fn js_string(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

/// Returns the tag of an expression built by this module.
pub fn script_kind(expression: &str) -> Option<&str> {
    let rest = expression.strip_prefix(TAG_PREFIX)?;
    let end = rest.find(" */")?;
    Some(&rest[..end])
}

fn tagged(kind: &str, body: &str) -> String {
    format!("{}{} */ {}", TAG_PREFIX, kind, body)
}

const SIMPLE_SELECTOR_FN: &str = r#"const simpleSelector = (el) => {
      if (!el || el.nodeType !== 1) return null;
      if (el.id) return '#' + CSS.escape(el.id);
      const aria = el.getAttribute('aria-label');
      if (aria) return el.tagName.toLowerCase() + '[aria-label="' + CSS.escape(aria) + '"]';
      const name = el.getAttribute('name');
      if (name) return el.tagName.toLowerCase() + '[name="' + CSS.escape(name) + '"]';
      if (el.classList && el.classList.length) {
        const cls = Array.from(el.classList).slice(0, 2).map((c) => CSS.escape(c)).join('.');
        if (cls) return el.tagName.toLowerCase() + '.' + cls;
      }
      return el.tagName ? el.tagName.toLowerCase() : null;
    };"#;

const PROBE: &str = r#"(() => {
    const selector = __SELECTOR__;
    let target = null;
    try { target = document.querySelector(selector); } catch (_err) { target = null; }
    if (!target) return { found: false, selector, url: location.href };
    const rect = target.getBoundingClientRect();
    const style = getComputedStyle(target);
    return {
      found: true,
      selector,
      url: location.href,
      tag: target.tagName ? target.tagName.toLowerCase() : null,
      role: target.getAttribute ? target.getAttribute('role') : null,
      ariaLabel: target.getAttribute ? target.getAttribute('aria-label') : null,
      text: String(target.innerText || target.textContent || '').replace(/\s+/g, ' ').trim().slice(0, 140),
      value: 'value' in target ? String(target.value || '') : null,
      contentEditable: !!target.isContentEditable,
      visible: rect.width > 0 && rect.height > 0 && style.display !== 'none' && style.visibility !== 'hidden',
      rect: {
        x: Number(rect.x) || 0,
        y: Number(rect.y) || 0,
        width: Number(rect.width) || 0,
        height: Number(rect.height) || 0
      }
    };
  })()"#;

/// Read-only probe reporting whether `selector` matches in the evaluated context.
pub fn selector_probe(selector: &str) -> String {
    tagged("probe", &PROBE.replace("__SELECTOR__", &js_string(selector)))
}

const INSPECT: &str = r#"(() => {
    const mode = __MODE__;
    const targetSelector = __TARGET__;
    const maxNodes = __MAX_NODES__;
    __SIMPLE_SELECTOR__

    let root = document.body || document.documentElement;
    let targetFound = false;
    if (mode === 'zoom' && targetSelector) {
      let zoomed = null;
      try { zoomed = document.querySelector(targetSelector); } catch (_err) { zoomed = null; }
      targetFound = !!zoomed;
      root = zoomed;
    }
    const nodes = [];
    const interactiveTags = ['button', 'a', 'input', 'textarea', 'select'];
    const interactiveRoles = ['button', 'textbox', 'menuitem', 'link', 'tab', 'checkbox', 'radio', 'combobox'];
    const landmarkTags = ['main', 'nav', 'section', 'form', 'table', 'header', 'footer', 'aside'];
    const pushNode = (el) => {
      if (!el || !el.tagName) return;
      const tag = el.tagName.toLowerCase();
      const role = el.getAttribute('role') || null;
      const label = el.getAttribute('aria-label') || el.getAttribute('name') || el.getAttribute('placeholder') || null;
      nodes.push({
        tag,
        role,
        selector: simpleSelector(el),
        label: label ? String(label).slice(0, 80) : null,
        text: String(el.innerText || '').replace(/\s+/g, ' ').trim().slice(0, 120),
        interactive: interactiveTags.includes(tag) || interactiveRoles.includes(String(role || '').toLowerCase()) || el.hasAttribute('contenteditable')
      });
    };
    if (root) {
      const walker = document.createTreeWalker(root, NodeFilter.SHOW_ELEMENT);
      let count = 0;
      while (walker.nextNode() && count < maxNodes) {
        pushNode(walker.currentNode);
        count += 1;
      }
    }
    const interactive = nodes.filter((n) => n.interactive).slice(0, Math.floor(maxNodes * 0.6));
    const landmarks = nodes.filter((n) => landmarkTags.includes(n.tag)).slice(0, 60);
    return {
      mode,
      url: location.href,
      title: document.title || '',
      focusedSelector: simpleSelector(document.activeElement),
      targetSelector: targetSelector || null,
      targetFound,
      frameSummary: { totalNodes: nodes.length, interactiveCount: interactive.length, interactive, landmarks }
    };
  })()"#;

/// Breadth-limited element map of one context, optionally rooted at `target_selector`.
pub fn inspect_page(mode: &str, target_selector: Option<&str>, max_nodes: u32) -> String {
    let body = INSPECT
        .replace("__SIMPLE_SELECTOR__", SIMPLE_SELECTOR_FN)
        .replace("__MODE__", &js_string(mode))
        .replace("__MAX_NODES__", &max_nodes.to_string())
        .replace("__TARGET__", &js_string(target_selector.unwrap_or("")));
    tagged("inspect", &body)
}

const CONTEXT: &str = r#"(() => {
    const selector = __SELECTOR__;
    const radius = __RADIUS__;
    const maxSiblings = __MAX_SIBLINGS__;
    const maxChildren = __MAX_CHILDREN__;
    __SIMPLE_SELECTOR__
    const info = (el) => {
      if (!el || !el.tagName) return null;
      const rect = el.getBoundingClientRect();
      const style = getComputedStyle(el);
      return {
        tag: el.tagName.toLowerCase(),
        role: el.getAttribute('role') || null,
        selector: simpleSelector(el),
        ariaLabel: el.getAttribute('aria-label') || null,
        name: el.getAttribute('name') || null,
        placeholder: el.getAttribute('placeholder') || null,
        text: String(el.innerText || el.textContent || '').replace(/\s+/g, ' ').trim().slice(0, 120),
        visible: rect.width > 0 && rect.height > 0 && style.display !== 'none' && style.visibility !== 'hidden',
        bounds: { x: Math.round(rect.x), y: Math.round(rect.y), w: Math.round(rect.width), h: Math.round(rect.height) }
      };
    };
    let target = null;
    try { target = document.querySelector(selector); } catch (_err) { target = null; }
    const result = {
      url: location.href,
      frameTitle: document.title || '',
      requestedSelector: selector,
      found: !!target,
      target: info(target),
      ancestry: [],
      siblings: [],
      descendants: []
    };
    if (!target) return result;
    let current = target.parentElement;
    for (let depth = 0; current && depth < radius; depth += 1) {
      const entry = info(current);
      if (entry) result.ancestry.push(entry);
      current = current.parentElement;
    }
    const siblings = Array.from((target.parentElement && target.parentElement.children) || []).filter((el) => el !== target);
    result.siblings = siblings.slice(0, maxSiblings).map(info).filter(Boolean);
    result.descendants = Array.from(target.querySelectorAll('*')).slice(0, maxChildren).map(info).filter(Boolean);
    return result;
  })()"#;

/// Target element plus bounded ancestry, siblings and descendants.
pub fn action_context(selector: &str, radius: u32, max_siblings: u32, max_children: u32) -> String {
    let body = CONTEXT
        .replace("__SIMPLE_SELECTOR__", SIMPLE_SELECTOR_FN)
        .replace("__RADIUS__", &radius.to_string())
        .replace("__MAX_SIBLINGS__", &max_siblings.to_string())
        .replace("__MAX_CHILDREN__", &max_children.to_string())
        .replace("__SELECTOR__", &js_string(selector));
    tagged("context", &body)
}

const NOTIFY: &str = "el.dispatchEvent(new Event('input', { bubbles: true, cancelable: true, composed: true }));";
const NOTIFY_CHANGE: &str = "el.dispatchEvent(new Event('change', { bubbles: true, cancelable: true, composed: true }));";

fn lookup(selector: &str) -> String {
    format!(
        "let el = null; try {{ el = document.querySelector({}); }} catch (_err) {{ el = null; }} if (!el) return {{ ok: false, reason: 'TARGET_NOT_FOUND' }};",
        js_string(selector)
    )
}

/// Replaces the element's value (or text for contenteditable) and fires input/change.
pub fn fill(selector: &str, value: &str) -> String {
    let value = js_string(value);
    tagged(
        "fill",
        &format!(
            "(() => {{ {lookup} el.focus(); if (el.isContentEditable) {{ el.textContent = {v}; }} else if ('value' in el) {{ el.value = {v}; }} else {{ el.textContent = {v}; }} {notify} {change} return {{ ok: true }}; }})()",
            lookup = lookup(selector),
            v = value,
            notify = NOTIFY,
            change = NOTIFY_CHANGE,
        ),
    )
}

/// Appends `text` to the element's existing content and fires input.
pub fn type_text(selector: &str, text: &str) -> String {
    let text = js_string(text);
    tagged(
        "type",
        &format!(
            "(() => {{ {lookup} el.focus(); if (el.isContentEditable) {{ document.execCommand('insertText', false, {t}); }} else if ('value' in el) {{ el.value = String(el.value || '') + {t}; }} else {{ el.textContent = String(el.textContent || '') + {t}; }} {notify} return {{ ok: true }}; }})()",
            lookup = lookup(selector),
            t = text,
            notify = NOTIFY,
        ),
    )
}

/// Sets a `<select>` element's value. Reports `NOT_SELECT` for any other element.
pub fn select_option(selector: &str, value: &str) -> String {
    tagged(
        "select",
        &format!(
            "(() => {{ {lookup} if (!(el instanceof HTMLSelectElement)) return {{ ok: false, reason: 'NOT_SELECT' }}; el.focus(); el.value = {v}; {notify} {change} return {{ ok: true }}; }})()",
            lookup = lookup(selector),
            v = js_string(value),
            notify = NOTIFY,
            change = NOTIFY_CHANGE,
        ),
    )
}

/// Re-reads the element's current value, used for post-write verification.
pub fn read_value(selector: &str) -> String {
    tagged(
        "read-value",
        &format!(
            "(() => {{ {lookup} const current = el.isContentEditable ? String(el.textContent || '') : ('value' in el ? String(el.value || '') : String(el.textContent || '')); return {{ ok: true, current }}; }})()",
            lookup = lookup(selector),
        ),
    )
}

pub fn read_text(selector: &str) -> String {
    tagged(
        "read-text",
        &format!(
            "(() => {{ {lookup} return {{ ok: true, text: String(el.innerText || el.textContent || '').slice(0, 1000) }}; }})()",
            lookup = lookup(selector),
        ),
    )
}

const RECORDER: &str = r#"(() => {
    if (window.__tabpilotRecorderInstalled) return 'already-installed';
    window.__tabpilotRecorderInstalled = true;
    const binding = __BINDING__;
    const emit = (payload) => {
      try {
        if (typeof window[binding] === 'function') window[binding](JSON.stringify(payload));
      } catch (_err) {}
    };
    const stableSelector = (el) => {
      if (!el || el.nodeType !== 1) return null;
      if (el.id) return '#' + CSS.escape(el.id);
      const aria = el.getAttribute && el.getAttribute('aria-label');
      if (aria) return el.tagName.toLowerCase() + '[aria-label="' + CSS.escape(aria) + '"]';
      const name = el.getAttribute && (el.getAttribute('name') || el.getAttribute('placeholder'));
      if (name) return el.tagName.toLowerCase() + '[name="' + CSS.escape(name) + '"]';
      const parent = el.parentElement;
      if (parent) {
        const index = Array.from(parent.children).indexOf(el) + 1;
        return el.tagName.toLowerCase() + ':nth-child(' + index + ')';
      }
      return el.tagName ? el.tagName.toLowerCase() : null;
    };
    const base = (target) => {
      const selector = stableSelector(target);
      return {
        selector,
        confidence: selector && /nth-(child|of-type)/.test(selector) ? 'low' : 'high',
        tag: target && target.tagName ? target.tagName.toLowerCase() : null,
        ariaLabel: target && target.getAttribute ? target.getAttribute('aria-label') : null,
        innerText: target ? String(target.innerText || '').slice(0, 120) : null,
        ts: Date.now(),
        href: location.href
      };
    };
    document.addEventListener('click', (event) => {
      emit({ action: 'click', ...base(event.target) });
    }, true);
    document.addEventListener('keydown', (event) => {
      emit({
        action: 'keyboard',
        ...base(event.target),
        key: event.key,
        code: event.code,
        ctrlKey: !!event.ctrlKey,
        metaKey: !!event.metaKey,
        altKey: !!event.altKey,
        shiftKey: !!event.shiftKey
      });
    }, true);
    document.addEventListener('input', (event) => {
      const target = event.target;
      const value = target && ('value' in target) ? target.value : (target && target.textContent ? target.textContent : '');
      emit({ action: 'fill', ...base(target), value: String(value || '').slice(0, 400) });
    }, true);
    return 'installed';
  })()"#;

/// Capture listeners that report click/keydown/input through the `binding` callback.
/// Idempotent per document.
pub fn recorder_install(binding: &str) -> String {
    tagged("recorder", &RECORDER.replace("__BINDING__", &js_string(binding)))
}
