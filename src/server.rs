use crate::drums::DrumKind;
use crate::session::Session;
use crate::sounds::{self, Instrument};
use crate::tutorial::TUTORIALS;
use crate::types::{Command, Finger, Notification};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use serde_json::json;
use sha1_smol::Sha1;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Combined HTTP + WebSocket server.
///
/// - `GET /` → serves the UI page when one is configured
/// - WebSocket upgrade → full-duplex control channel: JSON commands in,
///   JSON notifications out, with a one-shot init payload on connect
///
/// Single port, no separate HTTP server needed.
pub struct WsServer {
    notif_rx: Receiver<Notification>,
    command_tx: Sender<Command>,
    session: Arc<Session>,
    addr: String,
    ui_path: Option<PathBuf>,
}

struct WsClient {
    stream: TcpStream,
    alive: bool,
}

impl WsClient {
    fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        // Writes time out rather than block the broadcast loop on one
        // stalled client
        let _ = stream.set_write_timeout(Some(Duration::from_secs(1)));
        Self {
            stream,
            alive: true,
        }
    }

    fn send_text(&mut self, text: &str) -> bool {
        let payload = text.as_bytes();
        let len = payload.len();
        let mut frame = Vec::with_capacity(10 + len);
        frame.push(0x81); // FIN + text opcode
        if len < 126 {
            frame.push(len as u8);
        } else if len < 65536 {
            frame.push(126);
            frame.push((len >> 8) as u8);
            frame.push((len & 0xFF) as u8);
        } else {
            frame.push(127);
            for i in (0..8).rev() {
                frame.push(((len >> (i * 8)) & 0xFF) as u8);
            }
        }
        frame.extend_from_slice(payload);
        match self.stream.write_all(&frame) {
            Ok(()) => true,
            Err(_) => {
                self.alive = false;
                false
            }
        }
    }
}

type ClientList = Arc<Mutex<Vec<WsClient>>>;

/// Parsed HTTP request — enough to decide WS vs HTTP.
struct HttpRequest {
    path: String,
    is_upgrade: bool,
    ws_key: Option<String>,
}

fn parse_request(stream: &mut TcpStream) -> Result<HttpRequest, String> {
    let mut reader = BufReader::new(stream.try_clone().map_err(|e| e.to_string())?);
    let mut path = String::from("/");
    let mut is_upgrade = false;
    let mut ws_key = None;
    let mut first = true;

    loop {
        let mut line = String::new();
        reader.read_line(&mut line).map_err(|e| e.to_string())?;
        let trimmed = line.trim().to_string();
        if trimmed.is_empty() {
            break;
        }
        if first {
            // Parse "GET /path HTTP/1.1"
            let parts: Vec<&str> = trimmed.split_whitespace().collect();
            if parts.len() >= 2 {
                path = parts[1].to_string();
            }
            first = false;
        }
        let lower = trimmed.to_lowercase();
        if lower.starts_with("upgrade:") && lower.contains("websocket") {
            is_upgrade = true;
        }
        if lower.starts_with("sec-websocket-key:") {
            ws_key = Some(trimmed[18..].trim().to_string());
        }
    }
    Ok(HttpRequest {
        path,
        is_upgrade,
        ws_key,
    })
}

fn ws_handshake(stream: &mut TcpStream, key: &str) -> Result<(), String> {
    let magic = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut hasher = Sha1::new();
    hasher.update(format!("{}{}", key, magic).as_bytes());
    let hash = hasher.digest().bytes();
    let accept = base64_encode(&hash);
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept
    );
    stream
        .write_all(response.as_bytes())
        .map_err(|e| e.to_string())
}

/// One client-to-server frame: opcode plus unmasked payload.
struct WsFrame {
    opcode: u8,
    payload: Vec<u8>,
}

/// Read one masked frame off a client stream (RFC 6455 client frames are
/// always masked). Blocks until a full frame or an error.
fn read_client_frame(stream: &mut TcpStream) -> Result<WsFrame, String> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).map_err(|e| e.to_string())?;
    let opcode = head[0] & 0x0F;
    let masked = head[1] & 0x80 != 0;
    let mut len = (head[1] & 0x7F) as u64;

    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).map_err(|e| e.to_string())?;
        len = u64::from(u16::from_be_bytes(ext));
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).map_err(|e| e.to_string())?;
        len = u64::from_be_bytes(ext);
    }
    if len > 1_000_000 {
        return Err(format!("oversized frame: {} bytes", len));
    }

    let mut mask = [0u8; 4];
    if masked {
        stream.read_exact(&mut mask).map_err(|e| e.to_string())?;
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).map_err(|e| e.to_string())?;
    if masked {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= mask[i % 4];
        }
    }
    Ok(WsFrame { opcode, payload })
}

fn serve_html(stream: &mut TcpStream, content: &[u8]) {
    serve_static(stream, content, "text/html; charset=utf-8");
}

fn serve_static(stream: &mut TcpStream, content: &[u8], content_type: &str) {
    let header = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Cache-Control: no-cache\r\n\
         \r\n",
        content_type,
        content.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(content);
}

fn content_type_for(path: &str) -> &'static str {
    if path.ends_with(".js") {
        "application/javascript; charset=utf-8"
    } else if path.ends_with(".css") {
        "text/css; charset=utf-8"
    } else if path.ends_with(".json") {
        "application/json"
    } else if path.ends_with(".svg") {
        "image/svg+xml"
    } else if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".html") {
        "text/html; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn serve_404(stream: &mut TcpStream) {
    let body = b"<h1>404</h1><p>Connect a WebSocket client to control the glove</p>";
    let header = format!(
        "HTTP/1.1 404 Not Found\r\n\
         Content-Type: text/html\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
}

fn base64_encode(data: &[u8]) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut result = String::new();
    let mut i = 0;
    while i < data.len() {
        let b0 = data[i] as u32;
        let b1 = if i + 1 < data.len() {
            data[i + 1] as u32
        } else {
            0
        };
        let b2 = if i + 2 < data.len() {
            data[i + 2] as u32
        } else {
            0
        };
        let triple = (b0 << 16) | (b1 << 8) | b2;
        result.push(CHARS[((triple >> 18) & 0x3F) as usize] as char);
        result.push(CHARS[((triple >> 12) & 0x3F) as usize] as char);
        if i + 1 < data.len() {
            result.push(CHARS[((triple >> 6) & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
        if i + 2 < data.len() {
            result.push(CHARS[(triple & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
        i += 3;
    }
    result
}

/// Everything a freshly connected UI needs to render itself: patch
/// catalog, sound and instrument lists, tutorial index, current status.
/// Presets and tutorials are keyed objects and the status lives under
/// `state`, the shape the shipped frontend reads.
pub fn init_payload(session: &Session) -> String {
    let state = session.state.lock().unwrap();
    let presets: serde_json::Map<String, serde_json::Value> = state
        .patches
        .iter()
        .map(|p| {
            let mapping: serde_json::Map<String, serde_json::Value> = Finger::ALL
                .iter()
                .map(|&f| (f.name().to_string(), json!(p.sound(f).token)))
                .collect();
            (
                p.name.clone(),
                json!({
                    "name": p.label,
                    "instrument": p.instrument.name(),
                    "mapping": mapping,
                }),
            )
        })
        .collect();
    let tutorials: serde_json::Map<String, serde_json::Value> = TUTORIALS
        .iter()
        .map(|t| {
            (
                t.id.to_string(),
                json!({
                    "name": t.name,
                    "difficulty": t.difficulty,
                    "length": t.sequence.len(),
                }),
            )
        })
        .collect();
    // Per-finger sound kinds of the editable patch
    let custom_types: serde_json::Map<String, serde_json::Value> = state
        .patch_by_name("custom")
        .map(|p| {
            Finger::ALL
                .iter()
                .map(|&f| (f.name().to_string(), json!(p.sound(f).kind)))
                .collect()
        })
        .unwrap_or_default();

    json!({
        "type": "init",
        "presets": presets,
        "chords": sounds::sound_catalog(),
        "drums": DrumKind::ALL.iter().map(|d| d.name()).collect::<Vec<_>>(),
        "instruments": Instrument::ALL.iter().map(|i| i.name()).collect::<Vec<_>>(),
        "tutorials": tutorials,
        "custom_types": custom_types,
        "state": {
            "connected": session.is_connected(),
            "calibrated": state.is_calibrated(),
            "current_preset": state.current_preset,
            "threshold": state.threshold,
            "mode": state.mode,
        },
    })
    .to_string()
}

impl WsServer {
    pub fn new(
        notif_rx: Receiver<Notification>,
        command_tx: Sender<Command>,
        session: Arc<Session>,
        addr: String,
        ui_path: Option<PathBuf>,
    ) -> Self {
        Self {
            notif_rx,
            command_tx,
            session,
            addr,
            ui_path,
        }
    }

    pub fn run(self) {
        let clients: ClientList = Arc::new(Mutex::new(Vec::new()));

        // Pre-load the UI page when one is configured
        let ui_html = Arc::new(match &self.ui_path {
            Some(path) => match fs::read(path) {
                Ok(data) => {
                    info!("Loaded UI: {} ({} bytes)", path.display(), data.len());
                    data
                }
                Err(e) => {
                    warn!("Could not load {}: {} — HTTP serving disabled", path.display(), e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        });
        let base_dir: Arc<Option<PathBuf>> = Arc::new(
            self.ui_path
                .as_ref()
                .and_then(|p| p.parent())
                .map(|p| p.to_path_buf()),
        );

        // Acceptor thread
        let accept_clients = clients.clone();
        let addr = self.addr.clone();
        let session = self.session.clone();
        let command_tx = self.command_tx.clone();
        thread::Builder::new()
            .name("ws-accept".into())
            .spawn(move || {
                let listener = match TcpListener::bind(&addr) {
                    Ok(l) => l,
                    Err(e) => {
                        error!("Server failed to bind {}: {}", addr, e);
                        return;
                    }
                };
                info!("Server listening on http://{}", addr);

                for stream in listener.incoming() {
                    match stream {
                        Ok(mut stream) => {
                            let html = ui_html.clone();
                            let cl = accept_clients.clone();
                            let sdir = base_dir.clone();
                            let sess = session.clone();
                            let cmd_tx = command_tx.clone();
                            // Handle each connection in a short-lived thread
                            // (HTTP connections close immediately; WS
                            //  connections split into a reader thread and a
                            //  write handle on the client list)
                            thread::spawn(move || match parse_request(&mut stream) {
                                Ok(req) if req.is_upgrade => {
                                    if let Some(key) = req.ws_key {
                                        match ws_handshake(&mut stream, &key) {
                                            Ok(()) => attach_client(stream, &cl, &sess, cmd_tx),
                                            Err(e) => warn!("WS handshake failed: {}", e),
                                        }
                                    }
                                }
                                Ok(req) => serve_http(&mut stream, &req.path, &html, &sdir),
                                Err(e) => warn!("Request parse error: {}", e),
                            });
                        }
                        Err(e) => warn!("TCP accept error: {}", e),
                    }
                }
            })
            .expect("spawn ws-accept");

        // Broadcast loop: every notification goes to every live client
        for notif in self.notif_rx.iter() {
            let json = match serde_json::to_string(&notif) {
                Ok(j) => j,
                Err(e) => {
                    warn!("JSON serialize error: {}", e);
                    continue;
                }
            };
            let mut cl = clients.lock().unwrap();
            for client in cl.iter_mut() {
                client.send_text(&json);
            }
            cl.retain(|c| c.alive);
        }
    }
}

/// Finish wiring a freshly upgraded client: send the init payload, park
/// the write handle on the broadcast list, and spin up its reader thread.
fn attach_client(
    stream: TcpStream,
    clients: &ClientList,
    session: &Arc<Session>,
    command_tx: Sender<Command>,
) {
    info!("WebSocket client connected");
    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!("Could not clone client stream: {}", e);
            return;
        }
    };
    let mut client = WsClient::new(stream);
    client.send_text(&init_payload(session));
    clients.lock().unwrap().push(client);

    thread::Builder::new()
        .name("ws-client".into())
        .spawn(move || client_reader(reader_stream, command_tx))
        .expect("spawn ws-client");
}

fn client_reader(mut stream: TcpStream, command_tx: Sender<Command>) {
    loop {
        let frame = match read_client_frame(&mut stream) {
            Ok(f) => f,
            Err(e) => {
                debug!("WS client read ended: {}", e);
                return;
            }
        };
        match frame.opcode {
            // Text frame: one JSON command
            0x1 => {
                let text = match std::str::from_utf8(&frame.payload) {
                    Ok(t) => t,
                    Err(_) => {
                        warn!("Non-UTF8 text frame dropped");
                        continue;
                    }
                };
                match serde_json::from_str::<Command>(text) {
                    Ok(cmd) => {
                        debug!("Command: {:?}", cmd);
                        if command_tx.send(cmd).is_err() {
                            return; // engine gone
                        }
                    }
                    // Malformed or unknown commands are ignored
                    Err(e) => warn!("Bad command {:?}: {}", text, e),
                }
            }
            // Close
            0x8 => {
                info!("WebSocket client disconnected");
                return;
            }
            // Ping/pong and binary frames are ignored
            _ => {}
        }
    }
}

fn serve_http(
    stream: &mut TcpStream,
    path: &str,
    html: &[u8],
    base_dir: &Option<PathBuf>,
) {
    match path {
        "/" | "/index.html" => {
            if html.is_empty() {
                serve_404(stream);
            } else {
                serve_html(stream, html);
            }
        }
        path => {
            // Static siblings of the UI page. Sanitize: strip leading /,
            // reject path traversal
            let clean = path.trim_start_matches('/');
            let Some(dir) = base_dir else {
                serve_404(stream);
                return;
            };
            if clean.contains("..") || clean.contains('\\') {
                serve_404(stream);
                return;
            }
            match fs::read(dir.join(clean)) {
                Ok(data) => serve_static(stream, &data, content_type_for(clean)),
                Err(_) => serve_404(stream),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_known_vectors() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn test_handshake_accept_value() {
        // Worked example from RFC 6455 §1.3
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let magic = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
        let mut hasher = Sha1::new();
        hasher.update(format!("{}{}", key, magic).as_bytes());
        let accept = base64_encode(&hasher.digest().bytes());
        assert_eq!(accept, "s3pPLAsbWVDdyB8aMXg0RHA2mlQhlfRazEE2yYo3vVk=");
    }

    #[test]
    fn test_init_payload_shape() {
        let session = Session::new();
        let payload = init_payload(&session);
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["type"], "init");
        assert_eq!(v["state"]["current_preset"], "piano");
        assert_eq!(v["state"]["mode"], "play");
        assert_eq!(v["state"]["connected"], false);
        assert_eq!(v["presets"].as_object().unwrap().len(), 5);
        assert_eq!(v["presets"]["piano"]["mapping"]["thumb"], "C");
        assert_eq!(v["presets"]["drums"]["instrument"], "drums");
        assert_eq!(v["tutorials"].as_object().unwrap().len(), 5);
        assert_eq!(v["tutorials"]["scale"]["difficulty"], "Beginner");
        assert!(v["chords"].as_array().unwrap().iter().any(|s| s == "C_maj"));
        assert_eq!(v["drums"].as_array().unwrap().len(), 6);
        assert_eq!(v["custom_types"]["thumb"], "note");
        // Every preset maps all five fingers
        for (_, p) in v["presets"].as_object().unwrap() {
            assert_eq!(p["mapping"].as_object().unwrap().len(), 5);
        }
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("app.js"), "application/javascript; charset=utf-8");
        assert_eq!(content_type_for("style.css"), "text/css; charset=utf-8");
        assert_eq!(content_type_for("weird.bin"), "application/octet-stream");
    }
}
