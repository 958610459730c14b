//! Embedded browser page.
//!
//! A plain table with infinite scroll, a global search box and a JSON
//! upload form. Compiled into the binary; no external assets.

const BASE_PLACEHOLDER: &str = "__BASE_PATH__";

/// The page with the base path filled in.
pub fn render(base_path: &str) -> String {
    INDEX_HTML.replace(BASE_PLACEHOLDER, base_path)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="de">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Radiologie-Analyse</title>
<style>
:root {
  --bg: #0d1117;
  --surface: #161b22;
  --border: #30363d;
  --text: #e6edf3;
  --muted: #8b949e;
  --accent: #58a6ff;
  --red: #f85149;
  --font: -apple-system, BlinkMacSystemFont, 'Segoe UI', Helvetica, Arial, sans-serif;
}
* { margin: 0; padding: 0; box-sizing: border-box; }
body { background: var(--bg); color: var(--text); font-family: var(--font); font-size: 14px; }
header { display: flex; gap: 12px; align-items: center; padding: 12px 16px; background: var(--surface); border-bottom: 1px solid var(--border); }
header h1 { font-size: 16px; flex: 1; }
input[type=search] { background: var(--bg); color: var(--text); border: 1px solid var(--border); border-radius: 6px; padding: 6px 10px; width: 260px; }
button { background: var(--accent); color: #000; border: 0; border-radius: 6px; padding: 6px 12px; cursor: pointer; }
table { width: 100%; border-collapse: collapse; }
thead th { position: sticky; top: 0; background: var(--surface); text-align: left; padding: 8px; border-bottom: 1px solid var(--border); white-space: nowrap; }
tbody td { padding: 8px; border-bottom: 1px solid var(--border); height: 40px; white-space: nowrap; }
#message { position: fixed; right: 16px; bottom: 16px; padding: 10px 14px; border-radius: 6px; background: var(--red); display: none; cursor: pointer; }
#status { color: var(--muted); padding: 12px 16px; }
</style>
</head>
<body>
<header>
  <h1>Radiologie-Analyse</h1>
  <input id="search" type="search" placeholder="Suchen ...">
  <input id="files" type="file" accept="application/json" multiple>
  <button id="upload">Hochladen</button>
</header>
<table>
  <thead><tr id="head"></tr></thead>
  <tbody id="body"></tbody>
</table>
<div id="status"></div>
<div id="message" title="Schliessen"></div>
<script>
const BASE = "__BASE_PATH__";
let columns = null, page = 0, loading = false, exhausted = false, rows = [];

function columnId(key) {
  return key.trim().toLowerCase().replace(/\s+/g, "_")
    .replace(/ä/g, "ae").replace(/ö/g, "oe").replace(/ü/g, "ue");
}

function showMessage(text) {
  const el = document.getElementById("message");
  el.textContent = text;
  el.style.display = "block";
  clearTimeout(el._timer);
  el._timer = setTimeout(() => { el.style.display = "none"; }, 5000);
}
document.getElementById("message").onclick = (e) => { e.target.style.display = "none"; };

function render() {
  const query = document.getElementById("search").value.toLowerCase();
  const body = document.getElementById("body");
  body.innerHTML = "";
  for (const row of rows) {
    const cells = columns.map((c) => row[c] ?? "");
    if (query && !cells.some((v) => String(v).toLowerCase().includes(query))) continue;
    const tr = document.createElement("tr");
    for (const v of cells) {
      const td = document.createElement("td");
      td.textContent = v;
      tr.appendChild(td);
    }
    body.appendChild(tr);
  }
  document.getElementById("status").textContent = rows.length + " Studien geladen";
}

async function loadPage() {
  if (loading) return;
  loading = true;
  try {
    const res = await fetch(BASE + "/api/studies?page=" + page);
    if (!res.ok) throw new Error("HTTP " + res.status);
    const data = await res.json();
    if (data.length === 0) { exhausted = true; return; }
    if (!columns) {
      columns = Object.keys(data[0]).map(columnId);
      const head = document.getElementById("head");
      for (const key of Object.keys(data[0])) {
        const th = document.createElement("th");
        th.textContent = key;
        head.appendChild(th);
      }
    }
    for (const item of data) {
      const row = {};
      for (const [k, v] of Object.entries(item)) row[columnId(k)] = v;
      rows.push(row);
    }
    page += 1;
    render();
  } catch (err) {
    showMessage("Fehler beim Laden der Daten: " + err.message);
  } finally {
    loading = false;
  }
}

let scrollTimer = null;
window.addEventListener("scroll", () => {
  clearTimeout(scrollTimer);
  scrollTimer = setTimeout(() => {
    const bottom = document.documentElement.scrollHeight - window.innerHeight - window.scrollY;
    if (!exhausted && bottom < 500) loadPage();
  }, 300);
});

let searchTimer = null;
document.getElementById("search").addEventListener("input", () => {
  clearTimeout(searchTimer);
  searchTimer = setTimeout(render, 300);
});

document.getElementById("upload").onclick = async () => {
  const input = document.getElementById("files");
  if (!input.files.length) return;
  const form = new FormData();
  for (const f of input.files) form.append("files", f);
  try {
    const res = await fetch(BASE + "/api/upload", { method: "POST", body: form });
    const result = await res.json();
    if (!res.ok) throw new Error(result.error || ("HTTP " + res.status));
    for (const e of result.errors) showMessage(e.filename + ": " + e.error);
    if (result.success.length) {
      rows = []; page = 0; exhausted = false;
      await loadPage();
    }
  } catch (err) {
    showMessage("Upload fehlgeschlagen: " + err.message);
  }
  input.value = "";
};

loadPage();
</script>
</body>
</html>
"##;
