//! tiny_http front end: a few worker threads sharing one listener.

use crate::{
    http::{Method, Request, Response},
    App, Error,
};
use std::{io::Read, sync::Arc, thread};
use tiny_http::{Header, Server};

pub fn run(app: App) -> Result<(), Error> {
    let config = app.config().clone();
    let server = Server::http(config.bind)
        .map_err(|e| Error::Other(format!("Cannot listen on {}: {}", config.bind, e)))?;
    log::info!("Listening on http://{}", config.bind);

    let server = Arc::new(server);
    let app = Arc::new(app);
    let mut workers = Vec::with_capacity(config.workers);
    for n in 0..config.workers {
        let server = Arc::clone(&server);
        let app = Arc::clone(&app);
        let limit = config.max_upload_bytes;
        let worker = thread::Builder::new()
            .name(format!("http-{}", n))
            .spawn(move || loop {
                match server.recv() {
                    Ok(request) => serve(&app, request, limit),
                    Err(e) => log::error!("Accepting a request failed: {}", e),
                }
            })?;
        workers.push(worker);
    }

    for worker in workers {
        if worker.join().is_err() {
            log::error!("A worker thread panicked");
        }
    }
    Ok(())
}

fn serve(app: &App, mut request: tiny_http::Request, limit: usize) {
    let response = match read_request(&mut request, limit) {
        Ok(converted) => {
            let response = app.handle(&converted);
            log::info!(
                "{} {} -> {} ({} bytes)",
                request.method(),
                converted.path,
                response.status,
                response.body.len()
            );
            if converted.method == Method::Head {
                Response {
                    body: Vec::new(),
                    ..response
                }
            } else {
                response
            }
        }
        Err(err) => {
            log::info!("{} {} -> {}: {}", request.method(), request.url(), err.status(), err);
            Response::text(err.status(), &err.public_message())
        }
    };

    if let Err(e) = request.respond(into_tiny(response)) {
        log::warn!("Cannot send response: {}", e);
    }
}

fn read_request(request: &mut tiny_http::Request, limit: usize) -> Result<Request, Error> {
    let method = match request.method() {
        tiny_http::Method::Get => Method::Get,
        tiny_http::Method::Head => Method::Head,
        tiny_http::Method::Post => Method::Post,
        _ => Method::Other,
    };
    let mut converted = Request::new(method, request.url());
    for header in request.headers() {
        converted
            .headers
            .push((header.field.as_str().to_string(), header.value.as_str().to_owned()));
    }

    let declared = request.body_length();
    converted.body = read_body(declared, request.as_reader(), limit)?;
    Ok(converted)
}

/// Read at most `limit` bytes of body. A declared length over the limit is
/// refused before anything is read.
fn read_body<R: Read>(declared: Option<usize>, reader: R, limit: usize) -> Result<Vec<u8>, Error> {
    if declared.is_some_and(|length| length > limit) {
        return Err(Error::PayloadTooLarge { limit });
    }
    // Chunked bodies carry no length up front, so cap the read as well.
    let mut body = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut body)?;
    if body.len() > limit {
        return Err(Error::PayloadTooLarge { limit });
    }
    Ok(body)
}

fn into_tiny(response: Response) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let mut tiny = tiny_http::Response::from_data(response.body).with_status_code(response.status);
    for (name, value) in &response.headers {
        match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => tiny.add_header(header),
            Err(()) => log::warn!("Dropping invalid header {:?}", name),
        }
    }
    tiny
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn declared_length_over_limit_is_refused_unread() {
        let mut reader = Cursor::new(vec![0u8; 64]);
        let err = read_body(Some(65), &mut reader, 10).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { limit: 10 }));
        assert_eq!(err.status(), 413);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn undeclared_body_is_capped() {
        let err = read_body(None, Cursor::new(vec![1u8; 11]), 10).unwrap_err();
        assert_eq!(err.status(), 413);

        let body = read_body(None, Cursor::new(vec![1u8; 10]), 10).unwrap();
        assert_eq!(body.len(), 10);
        let body = read_body(Some(3), Cursor::new(b"abc".to_vec()), 10).unwrap();
        assert_eq!(body, b"abc");
    }

    #[test]
    fn status_code_survives_conversion() {
        let response = Response::text(413, "request body exceeds 10 bytes");
        let tiny = into_tiny(response);
        assert_eq!(tiny.status_code().0, 413);
    }
}
