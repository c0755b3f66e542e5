//! Route handlers.

use crate::{
    config::{Config, SigningMode},
    form::{collect_pages, looks_signed, read_upload},
    http::{Method, Request, Response},
    ids::DocId,
    qr::qr_png,
    render::render_pages,
    state::{CurrentDocument, HistoryEntry, StateStore},
    store::DocumentStore,
    tag::Signer,
    templates, Error, SigningDocument,
};
use chrono::Utc;
use serde_json::json;
use std::io::Cursor;

/// The whole service: configuration plus the stores it works on.
#[derive(Debug)]
pub struct App {
    config: Config,
    store: DocumentStore,
    state: StateStore,
    signer: Signer,
}

impl App {
    pub fn new(config: Config) -> Result<Self, Error> {
        let store = DocumentStore::open(&config.data_dir)?;
        let state = StateStore::open(&config.data_dir, config.history_limit)?;
        let signer = Signer::new(config.secret.clone());
        log::info!(
            "Data in {}, mode {:?}, zoom {}",
            config.data_dir.display(),
            config.mode,
            config.zoom
        );
        Ok(App {
            config,
            store,
            state,
            signer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dispatch a request. Never fails: errors become error responses,
    /// JSON for `/api/` routes and plain text elsewhere.
    pub fn handle(&self, request: &Request) -> Response {
        let result = self.route(request);
        match result {
            Ok(response) => response,
            Err(err) => {
                if err.status() >= 500 {
                    log::error!("{:?} {} failed: {}", request.method, request.path, err);
                } else {
                    log::info!("{:?} {} -> {}: {}", request.method, request.path, err.status(), err);
                }
                if request.path.starts_with("/api/") {
                    Response::json(
                        err.status(),
                        &json!({ "ok": false, "error": err.public_message() }),
                    )
                } else {
                    Response::text(err.status(), &err.public_message())
                }
            }
        }
    }

    fn route(&self, request: &Request) -> Result<Response, Error> {
        let path = request.path.as_str();
        match request.method {
            Method::Get | Method::Head => {
                if path == "/" {
                    return self.index(request);
                }
                if path == "/current" {
                    return self.current();
                }
                if path == "/api/current" {
                    return self.api_current(request);
                }
                if path == "/history" {
                    return Ok(Response::html(templates::history_page(&self.state.entries()?)));
                }
                if path == "/api/history" {
                    return Ok(Response::json(200, &json!({ "ok": true, "entries": self.state.entries()? })));
                }
                if path == "/qr/current" {
                    let url = self.external_url(request, "/current");
                    return Ok(Response::png(qr_png(&url)?));
                }
                if let Some(id) = request.path_param("/qr/") {
                    return self.qr(request, id);
                }
                if let Some(name) = request.path_param("/render/") {
                    return Ok(Response::png(self.store.read_render(name)?));
                }
                if let Some(id) = request.path_param("/sign/") {
                    return self.sign(id);
                }
                if let Some(name) = request.path_param("/download/") {
                    return self.download(name);
                }
            }
            Method::Post => {
                if path == "/upload" {
                    return self.upload(request);
                }
                if let Some(id) = request.path_param("/api/sign/") {
                    return self.api_sign(request, id);
                }
            }
            Method::Other => {}
        }
        Err(Error::not_found("Not found"))
    }

    /// Absolute URL for `path`: the configured public URL, or whatever host
    /// the client used to reach us.
    fn external_url(&self, request: &Request, path: &str) -> String {
        if let Some(base) = &self.config.public_url {
            return format!("{}{}", base, path);
        }
        let host = request.header("Host").unwrap_or("localhost");
        let scheme = match request.header("X-Forwarded-Proto") {
            Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
            _ => "http",
        };
        format!("{}://{}{}", scheme, host, path)
    }

    fn index(&self, request: &Request) -> Result<Response, Error> {
        let current_url = self.external_url(request, "/current");
        Ok(Response::html(templates::upload_page(&current_url, "/qr/current")))
    }

    fn upload(&self, request: &Request) -> Result<Response, Error> {
        let upload = read_upload(request.content_type(), &request.body)?;
        let id = DocId::generate();
        self.store.save_pdf(&id, &upload.bytes)?;
        log::info!(
            "Stored {:?} as {} ({} bytes)",
            upload.filename,
            id,
            upload.bytes.len()
        );

        self.state.set_current(&CurrentDocument {
            doc_id: id.clone(),
            filename: upload.filename.clone(),
            uploaded_at: Utc::now(),
        })?;
        self.record(HistoryEntry::uploaded(id.clone(), upload.filename.clone()))?;

        let sign_url = self.external_url(request, &format!("/sign/{}", id));
        let qr_url = self.external_url(request, &format!("/qr/{}", id));
        let current_url = self.external_url(request, "/current");
        Ok(Response::html(templates::share_page(
            id.as_str(),
            &upload.filename,
            &sign_url,
            &qr_url,
            &current_url,
        )))
    }

    fn qr(&self, request: &Request, id: &str) -> Result<Response, Error> {
        let id = DocId::parse(id)?;
        let sign_url = self.external_url(request, &format!("/sign/{}", id));
        Ok(Response::png(qr_png(&sign_url)?))
    }

    fn current(&self) -> Result<Response, Error> {
        match self.state.current()? {
            Some(current) if self.store.has_pdf(&current.doc_id) => {
                Ok(Response::redirect(&format!("/sign/{}", current.doc_id)))
            }
            _ => Ok(Response::html(templates::waiting_page("/api/current"))),
        }
    }

    fn api_current(&self, request: &Request) -> Result<Response, Error> {
        match self.state.current()? {
            Some(current) if self.store.has_pdf(&current.doc_id) => {
                let sign_url = self.external_url(request, &format!("/sign/{}", current.doc_id));
                Ok(Response::json(
                    200,
                    &json!({
                        "ok": true,
                        "doc_id": current.doc_id,
                        "filename": current.filename,
                        "uploaded_at": current.uploaded_at,
                        "sign_url": sign_url,
                    }),
                ))
            }
            _ => Ok(Response::json(200, &json!({ "ok": false }))),
        }
    }

    fn sign(&self, id: &str) -> Result<Response, Error> {
        let id = DocId::parse(id)?;
        let pdf = self.store.load_pdf(&id)?;
        let rendered = render_pages(&pdf, self.config.zoom)?;
        let mut pages = Vec::with_capacity(rendered.len());
        for page in rendered {
            let name = self.store.write_render(&id, page.index, &page.png)?;
            pages.push((page, name));
        }
        log::info!("Rendered {} page(s) of {}", pages.len(), id);
        Ok(Response::html(templates::sign_page(
            id.as_str(),
            &pages,
            &format!("/api/sign/{}", id),
        )))
    }

    fn api_sign(&self, request: &Request, id: &str) -> Result<Response, Error> {
        let id = DocId::parse(id)?;
        if !self.store.has_pdf(&id) {
            return Err(Error::not_found("PDF not found"));
        }

        let pages = collect_pages(request.content_type(), &request.body)?;
        if pages.is_empty() {
            return Err(Error::bad_request("No signature data received"));
        }
        if !looks_signed(&pages, self.config.min_overlay_bytes) {
            return Err(Error::bad_request("Signature looks empty"));
        }

        let filename = self
            .state
            .filename_of(&id)?
            .unwrap_or_else(|| format!("{}.pdf", id));

        match self.config.mode {
            SigningMode::Acknowledge => {
                let page_count = SigningDocument::load_mem(&self.store.load_pdf(&id)?)?.page_count();
                let pages_signed = pages
                    .iter()
                    .filter(|page| page.index < page_count)
                    .filter(|page| page.png.len() > self.config.min_overlay_bytes)
                    .count();
                if pages_signed == 0 {
                    return Err(Error::bad_request("Signature looks empty"));
                }
                self.finish(&id, HistoryEntry::signed(id.clone(), filename, pages_signed, None))?;
                log::info!("{} acknowledged as signed on {} page(s)", id, pages_signed);
                Ok(Response::json(
                    200,
                    &json!({ "ok": true, "message": "Document signed." }),
                ))
            }
            SigningMode::Composite => {
                let mut document = SigningDocument::load_mem(&self.store.load_pdf(&id)?)?;
                for page in &pages {
                    match document.add_overlay(page.index, Cursor::new(&page.png)) {
                        Ok(_) => {}
                        Err(err @ Error::PageOutOfRange { .. }) => {
                            log::warn!("Skipping overlay for {}: {}", id, err)
                        }
                        Err(Error::PngDecoding(e)) => {
                            return Err(Error::bad_request(format!("Invalid overlay image: {}", e)))
                        }
                        Err(err) => return Err(err),
                    }
                }
                let pages_signed = document.overlays_added();
                if pages_signed == 0 {
                    return Err(Error::bad_request("Signature looks empty"));
                }

                let signed_name = self.signer.signed_file_name(&id)?;
                self.store.write_signed(&signed_name, &document.to_bytes()?)?;
                self.finish(
                    &id,
                    HistoryEntry::signed(id.clone(), filename, pages_signed, Some(signed_name.clone())),
                )?;
                log::info!("{} signed on {} page(s) as {}", id, pages_signed, signed_name);
                Ok(Response::json(
                    200,
                    &json!({
                        "ok": true,
                        "message": "Document signed.",
                        "pages_signed": pages_signed,
                        "download_url": format!("/download/{}", signed_name),
                    }),
                ))
            }
        }
    }

    /// Drop the scratch copies, release the current pointer and log the event.
    fn finish(&self, id: &DocId, entry: HistoryEntry) -> Result<(), Error> {
        self.store.cleanup(id);
        self.state.clear_current_if(id)?;
        self.record(entry)
    }

    /// Append to the history. Signed copies of entries that fall off the end
    /// are deleted, their download links are no longer listed anywhere.
    fn record(&self, entry: HistoryEntry) -> Result<(), Error> {
        for dropped in self.state.append(entry)? {
            if let Some(name) = dropped.signed_file {
                log::info!("History full, removing {}", name);
                self.store.remove_signed(&name);
            }
        }
        Ok(())
    }

    fn download(&self, name: &str) -> Result<Response, Error> {
        self.signer.verify(name)?;
        let bytes = self.store.read_signed(name)?;
        Ok(Response::attachment("application/pdf", name, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::multipart_body;
    use crate::test_support::{blank_png, sample_pdf, stroke_png};
    use base64::Engine;

    const BOUNDARY: &str = "testboundary";

    fn app(dir: &tempfile::TempDir, mode: SigningMode) -> App {
        app_with(dir, |config| config.mode = mode)
    }

    fn app_with<F: FnOnce(&mut Config)>(dir: &tempfile::TempDir, configure: F) -> App {
        let mut config = Config::with_data_dir(dir.path());
        configure(&mut config);
        App::new(config).unwrap()
    }

    fn get(path: &str) -> Request {
        Request::new(Method::Get, path).with_header("Host", "tablet.local:8000")
    }

    fn upload(app: &App) -> DocId {
        let pdf = sample_pdf(2);
        let body = multipart_body(BOUNDARY, &[("file", Some("lease.pdf"), pdf.as_slice())]);
        let request = Request::new(Method::Post, "/upload")
            .with_header("Host", "tablet.local:8000")
            .with_header("Content-Type", &format!("multipart/form-data; boundary={}", BOUNDARY))
            .with_body(body);
        let response = app.handle(&request);
        assert_eq!(response.status, 200);
        app.state.current().unwrap().unwrap().doc_id
    }

    fn sign_request(id: &DocId, fields: &[(&str, Option<&str>, &[u8])]) -> Request {
        Request::new(Method::Post, &format!("/api/sign/{}", id))
            .with_header("Content-Type", &format!("multipart/form-data; boundary={}", BOUNDARY))
            .with_body(multipart_body(BOUNDARY, fields))
    }

    fn json(response: &Response) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn upload_sets_current_and_links_use_host() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, SigningMode::Composite);
        let id = upload(&app);

        let response = app.handle(&get("/current"));
        assert_eq!(response.status, 303);
        assert_eq!(response.header("Location"), Some(format!("/sign/{}", id).as_str()));

        let response = app.handle(&get("/api/current"));
        let body = json(&response);
        assert_eq!(body["ok"], true);
        assert_eq!(body["filename"], "lease.pdf");
        assert_eq!(body["sign_url"], format!("http://tablet.local:8000/sign/{}", id));
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, SigningMode::Composite);
        assert_eq!(app.handle(&get("/qr/NOT-HEX")).status, 400);
        assert_eq!(app.handle(&get("/sign/zzz")).status, 400);
        assert_eq!(app.handle(&get("/sign/abcdef")).status, 404);
        assert_eq!(app.handle(&get("/nope")).status, 404);
    }

    #[test]
    fn qr_codes_are_png() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, SigningMode::Composite);
        for path in ["/qr/0123456789ab", "/qr/current"] {
            let response = app.handle(&get(path));
            assert_eq!(response.status, 200);
            assert_eq!(response.header("Content-Type"), Some("image/png"));
            assert!(response.body.starts_with(b"\x89PNG"));
        }
    }

    #[test]
    fn sign_rejects_missing_and_empty_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, SigningMode::Composite);

        let response = app.handle(&sign_request(&DocId::parse("abcdef").unwrap(), &[]));
        assert_eq!(response.status, 404);
        assert_eq!(json(&response)["error"], "PDF not found");

        let id = upload(&app);
        let response = app.handle(&sign_request(&id, &[]));
        assert_eq!(response.status, 400);
        assert_eq!(json(&response)["error"], "No signature data received");

        let tiny = vec![1u8; 100];
        let response = app.handle(&sign_request(&id, &[("page_0", Some("p.png"), tiny.as_slice())]));
        assert_eq!(response.status, 400);
        assert_eq!(json(&response)["error"], "Signature looks empty");
        assert!(app.store.has_pdf(&id));
    }

    #[test]
    fn acknowledge_mode_discards_document() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, SigningMode::Acknowledge);
        let id = upload(&app);

        let big = vec![7u8; 4000];
        let response = app.handle(&sign_request(&id, &[("page_0", Some("p.png"), big.as_slice())]));
        assert_eq!(response.status, 200);
        let body = json(&response);
        assert_eq!(body["ok"], true);
        assert!(body.get("download_url").is_none());

        assert!(!app.store.has_pdf(&id));
        assert!(app.state.current().unwrap().is_none());
        let entries = app.state.entries().unwrap();
        assert_eq!(entries[0].event, crate::state::HistoryEvent::Signed);
        assert_eq!(entries[0].filename, "lease.pdf");
    }

    #[test]
    fn composite_mode_serves_signed_copy() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, SigningMode::Composite);
        let id = upload(&app);

        let overlay = stroke_png(979, 1267);
        let response = app.handle(&sign_request(
            &id,
            &[
                ("page_1", Some("p.png"), overlay.as_slice()),
                ("page_9", Some("p.png"), overlay.as_slice()),
            ],
        ));
        assert_eq!(response.status, 200, "{:?}", String::from_utf8_lossy(&response.body));
        let body = json(&response);
        assert_eq!(body["pages_signed"], 1);
        let download_url = body["download_url"].as_str().unwrap().to_owned();

        let response = app.handle(&get(&download_url));
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Type"), Some("application/pdf"));
        let signed = SigningDocument::load_mem(&response.body).unwrap();
        assert_eq!(signed.page_count(), 2);

        // A forged tag does not resolve.
        let forged = format!("/download/signed_{}_{}.pdf", id, "0".repeat(16));
        assert_eq!(app.handle(&get(&forged)).status, 404);

        assert!(!app.store.has_pdf(&id));
        let entries = app.state.entries().unwrap();
        assert_eq!(entries[0].pages_signed, 1);
        assert!(entries[0].signed_file.is_some());
    }

    #[test]
    fn links_prefer_public_url_then_forwarded_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(&dir, |config| {
            config.public_url = Some("https://sign.example.org".to_owned())
        });
        let id = upload(&app);
        let body = json(&app.handle(&get("/api/current")));
        assert_eq!(body["sign_url"], format!("https://sign.example.org/sign/{}", id));

        let dir = tempfile::tempdir().unwrap();
        let app = self::app(&dir, SigningMode::Composite);
        let id = upload(&app);
        let request = get("/api/current").with_header("X-Forwarded-Proto", "HTTPS");
        let body = json(&app.handle(&request));
        assert_eq!(body["sign_url"], format!("https://tablet.local:8000/sign/{}", id));
    }

    #[test]
    fn composite_mode_rejects_broken_and_transparent_overlays() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(&dir, |config| config.min_overlay_bytes = 10);
        let id = upload(&app);

        let stroke = stroke_png(400, 400);
        let truncated = &stroke[..stroke.len() / 2];
        let response = app.handle(&sign_request(&id, &[("page_0", Some("p.png"), truncated)]));
        assert_eq!(response.status, 400);
        let error = json(&response)["error"].as_str().unwrap().to_owned();
        assert!(error.starts_with("Invalid overlay image"), "{}", error);

        let blank = blank_png(100, 100);
        assert!(blank.len() > 10);
        let response = app.handle(&sign_request(&id, &[("page_0", Some("p.png"), blank.as_slice())]));
        assert_eq!(response.status, 400);
        assert_eq!(json(&response)["error"], "Signature looks empty");

        // Nothing was consumed by the failed attempts.
        assert!(app.store.has_pdf(&id));
        assert_eq!(app.state.current().unwrap().unwrap().doc_id, id);
    }

    #[test]
    fn json_data_urls_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(&dir, |config| config.min_overlay_bytes = 100);
        let id = upload(&app);

        let encoded = base64::engine::general_purpose::STANDARD.encode(stroke_png(979, 1267));
        let payload = serde_json::json!({
            "pages": [{ "index": 0, "dataURL": format!("data:image/png;base64,{}", encoded) }]
        });
        let request = Request::new(Method::Post, &format!("/api/sign/{}", id))
            .with_header("Content-Type", "application/json")
            .with_body(payload.to_string().into_bytes());
        let response = app.handle(&request);
        assert_eq!(response.status, 200, "{:?}", String::from_utf8_lossy(&response.body));
        assert_eq!(json(&response)["pages_signed"], 1);
    }

    #[test]
    fn acknowledge_mode_counts_only_real_overlays() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, SigningMode::Acknowledge);
        let id = upload(&app);

        let big = vec![7u8; 4000];
        let tiny = vec![7u8; 100];
        let response = app.handle(&sign_request(
            &id,
            &[
                ("page_0", Some("p.png"), big.as_slice()),
                ("page_1", Some("p.png"), tiny.as_slice()),
                ("page_7", Some("p.png"), big.as_slice()),
            ],
        ));
        assert_eq!(response.status, 200);
        assert_eq!(app.state.entries().unwrap()[0].pages_signed, 1);
    }

    #[test]
    fn trimmed_history_takes_signed_copies_along() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(&dir, |config| config.history_limit = 2);
        let id = upload(&app);

        let overlay = stroke_png(979, 1267);
        let response = app.handle(&sign_request(&id, &[("page_0", Some("p.png"), overlay.as_slice())]));
        assert_eq!(response.status, 200, "{:?}", String::from_utf8_lossy(&response.body));
        let download_url = json(&response)["download_url"].as_str().unwrap().to_owned();
        assert_eq!(app.handle(&get(&download_url)).status, 200);

        // Two more uploads push the signed entry out.
        upload(&app);
        assert_eq!(app.handle(&get(&download_url)).status, 200);
        upload(&app);
        assert_eq!(app.handle(&get(&download_url)).status, 404);
        assert_eq!(app.state.entries().unwrap().len(), 2);
    }
}
