mod error;
mod image_xobject;
mod pdf_object;

pub mod config;
pub mod form;
pub mod http;
pub mod ids;
pub mod qr;
pub mod render;
pub mod routes;
pub mod server;
pub mod state;
pub mod store;
pub mod tag;
mod templates;

use image_xobject::{ImageXObject, MAX_OVERLAY_DIMENSION};
use imagesize::blob_size;
use lopdf::{
    content::{Content, Operation},
    Document, Object, ObjectId, Stream,
};
use pdf_object::{inherited, number, PdfObjectDeref};
use std::io::{Cursor, Read};

pub use error::{Error, Result};
pub use lopdf;
pub use routes::App;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rectangle {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rectangle {
    fn from_array(values: &[Object]) -> Result<Self, Error> {
        if values.len() < 4 {
            return Err(Error::Other("Page box needs four numbers.".to_owned()));
        }
        let (a, b, c, d) = (
            number(&values[0])?,
            number(&values[1])?,
            number(&values[2])?,
            number(&values[3])?,
        );
        // Boxes may be given with any two opposite corners.
        Ok(Self {
            x1: a.min(c),
            y1: b.min(d),
            x2: a.max(c),
            y2: b.max(d),
        })
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// `cm` operands mapping the unit square of an image onto this box,
    /// upright for a page shown with a clockwise `rotation`.
    pub fn placement(&self, rotation: i64) -> [f64; 6] {
        let (w, h) = (self.width(), self.height());
        match rotation {
            90 => [0.0, h, -w, 0.0, self.x2, self.y1],
            180 => [-w, 0.0, 0.0, -h, self.x2, self.y2],
            270 => [0.0, -h, w, 0.0, self.x1, self.y2],
            _ => [w, 0.0, 0.0, h, self.x1, self.y1],
        }
    }
}

fn padded(mut operations: Vec<u8>) -> Vec<u8> {
    operations.insert(0, b'\n');
    operations.push(b'\n');
    operations
}

/// A PDF being signed: overlays are painted on top of the existing pages.
#[derive(Debug, Clone)]
pub struct SigningDocument {
    raw_document: Document,
    overlays_added: usize,
}

impl SigningDocument {
    pub fn new(raw_document: Document) -> Self {
        SigningDocument {
            raw_document,
            overlays_added: 0,
        }
    }

    pub fn load_mem(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self::new(Document::load_mem(bytes)?))
    }

    pub fn page_count(&self) -> usize {
        self.raw_document.get_pages().len()
    }

    /// Number of overlays painted so far.
    pub fn overlays_added(&self) -> usize {
        self.overlays_added
    }

    pub fn get_document_ref(&self) -> &Document {
        &self.raw_document
    }

    pub fn finished(self) -> Document {
        self.raw_document
    }

    pub fn to_bytes(mut self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        self.raw_document.save_to(&mut out)?;
        Ok(out)
    }

    /// Visible area of a page: the `CropBox` when present, the `MediaBox`
    /// otherwise. Both may be inherited from the page tree.
    pub fn page_rect(&self, page_id: ObjectId) -> Result<Rectangle, Error> {
        let doc = &self.raw_document;
        let page_box = match inherited(doc, page_id, b"CropBox")? {
            Some(crop_box) => crop_box,
            None => inherited(doc, page_id, b"MediaBox")?
                .ok_or_else(|| Error::Other("Page has no MediaBox.".to_owned()))?,
        };
        Rectangle::from_array(page_box.as_array()?)
    }

    /// Clockwise display rotation of a page: 0, 90, 180 or 270.
    pub fn page_rotation(&self, page_id: ObjectId) -> Result<i64, Error> {
        let rotate = match inherited(&self.raw_document, page_id, b"Rotate")? {
            Some(value) => number(value)? as i64,
            None => return Ok(0),
        };
        let rotation = rotate.rem_euclid(360);
        if rotation % 90 != 0 {
            log::warn!("Ignoring /Rotate {} on page {:?}", rotate, page_id);
            return Ok(0);
        }
        Ok(rotation)
    }

    /// Paint a PNG overlay across the whole of page `page_index` (0-based).
    ///
    /// The overlay is stretched to the page box as the page is displayed,
    /// `/Rotate` included, so it is expected to be a transparent PNG drawn
    /// over a render of that page. Returns `Ok(None)`
    /// without touching the page when the overlay is fully transparent.
    pub fn add_overlay<R: Read>(
        &mut self,
        page_index: usize,
        mut image_reader: R,
    ) -> Result<Option<ObjectId>, Error> {
        let pages = self.raw_document.get_pages();
        let page_id = *pages
            .get(&(page_index as u32 + 1))
            .ok_or(Error::PageOutOfRange {
                index: page_index,
                count: pages.len(),
            })?;

        let mut image_mem = Vec::new();
        image_reader.read_to_end(&mut image_mem)?;
        let dimensions = blob_size(&image_mem)
            .map_err(|e| Error::bad_request(format!("Unreadable overlay image: {:?}", e)))?;
        if dimensions.width > MAX_OVERLAY_DIMENSION || dimensions.height > MAX_OVERLAY_DIMENSION {
            return Err(Error::bad_request("Overlay image is too large"));
        }

        let image_decoder = png::Decoder::new(Cursor::new(image_mem));
        let mut image_xobject = ImageXObject::try_from(image_decoder)?;
        if image_xobject.is_blank() {
            log::debug!("Overlay for page {} is empty, skipping", page_index + 1);
            return Ok(None);
        }

        let rect = self.page_rect(page_id)?;
        let rotation = self.page_rotation(page_id)?;
        if let Some(mask) = image_xobject.mask_stream()? {
            image_xobject.s_mask = Some(self.raw_document.add_object(mask));
        }
        let image_xobject_id = self.raw_document.add_object(image_xobject.image_stream()?);

        let image_name = self.unused_xobject_name(page_id)?;
        self.localize_resources(page_id)?;
        self.raw_document
            .add_xobject(page_id, image_name.as_bytes(), image_xobject_id)?;
        self.add_image_to_page_stream(&image_name, page_id, rect, rotation)?;

        self.overlays_added += 1;
        Ok(Some(image_xobject_id))
    }

    /// Pick an XObject name that the page does not already use.
    fn unused_xobject_name(&self, page_id: ObjectId) -> Result<String, Error> {
        let doc = &self.raw_document;
        let xobjects = match inherited(doc, page_id, b"Resources")? {
            Some(resources) => match resources.as_dict()?.get(b"XObject") {
                Ok(xobjects) => Some(xobjects.deref(doc)?.as_dict()?),
                Err(_) => None,
            },
            None => None,
        };
        let mut n = 1;
        loop {
            let name = format!("SignPadOverlay{}", n);
            match xobjects {
                Some(dict) if dict.has(name.as_bytes()) => n += 1,
                _ => return Ok(name),
            }
        }
    }

    /// A page that only inherits its `Resources` gets its own copy, so that
    /// adding the overlay does not hide the inherited fonts and images.
    fn localize_resources(&mut self, page_id: ObjectId) -> Result<(), Error> {
        let page = self.raw_document.get_object(page_id)?.as_dict()?;
        if page.has(b"Resources") {
            return Ok(());
        }
        let inherited_resources = inherited(&self.raw_document, page_id, b"Resources")?.cloned();
        if let Some(resources) = inherited_resources {
            self.raw_document
                .get_object_mut(page_id)?
                .as_dict_mut()?
                .set("Resources", resources);
        }
        Ok(())
    }

    /// Wrap the existing content in `q ... Q` and append a stream painting
    /// the XObject over `rect`. The image must already be registered on the
    /// page resources.
    ///
    /// Readers join a `Contents` array without separators, so each added
    /// stream is padded with newlines to keep operators apart.
    fn add_image_to_page_stream(
        &mut self,
        xobject_name: &str,
        page_id: ObjectId,
        rect: Rectangle,
        rotation: i64,
    ) -> Result<(), Error> {
        let save = Content {
            operations: vec![Operation::new("q", vec![])],
        };
        let matrix = rect.placement(rotation);
        let overlay = Content {
            operations: vec![
                // Restore whatever state the original content left behind.
                Operation::new("Q", vec![]),
                Operation::new("q", vec![]),
                Operation::new("cm", matrix.iter().map(|&v| v.into()).collect()),
                Operation::new("Do", vec![Object::Name(xobject_name.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let save_id = self
            .raw_document
            .add_object(Stream::new(lopdf::Dictionary::new(), padded(save.encode()?)));
        let overlay_id = self
            .raw_document
            .add_object(Stream::new(lopdf::Dictionary::new(), padded(overlay.encode()?)));

        let existing = {
            let page = self.raw_document.get_object(page_id)?.as_dict()?;
            match page.get(b"Contents") {
                Ok(Object::Reference(id)) => match self.raw_document.get_object(*id)? {
                    // A reference to an array of streams.
                    Object::Array(streams) => streams.clone(),
                    _ => vec![Object::Reference(*id)],
                },
                Ok(Object::Array(streams)) => streams.clone(),
                _ => vec![],
            }
        };

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
        contents.push(Object::Reference(overlay_id));

        self.raw_document
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Contents", Object::Array(contents));
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{blank_png, sample_pdf, stroke_png};
    use super::*;
    use std::io::Cursor;

    #[test]
    fn page_rect_is_inherited_media_box() {
        let doc = SigningDocument::load_mem(&sample_pdf(1)).unwrap();
        let page_id = doc.get_document_ref().get_pages()[&1];
        let rect = doc.page_rect(page_id).unwrap();
        assert_eq!(rect.width(), 612.0);
        assert_eq!(rect.height(), 792.0);
    }

    #[test]
    fn overlay_is_painted_after_existing_content() {
        let mut doc = SigningDocument::load_mem(&sample_pdf(2)).unwrap();
        let added = doc
            .add_overlay(1, Cursor::new(stroke_png(979, 1267)))
            .unwrap();
        assert!(added.is_some());
        assert_eq!(doc.overlays_added(), 1);

        let raw = doc.finished();
        let page_id = raw.get_pages()[&2];
        let page = raw.get_object(page_id).unwrap().as_dict().unwrap();
        let contents = page.get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(contents.len(), 3);

        let content = raw.get_and_decode_page_content(page_id).unwrap();
        let ops: Vec<&str> = content
            .operations
            .iter()
            .map(|op| op.operator.as_str())
            .collect();
        assert_eq!(ops.first(), Some(&"q"));
        assert!(ops.contains(&"BT") && ops.contains(&"ET"));
        assert_eq!(&ops[ops.len() - 5..], &["Q", "q", "cm", "Do", "Q"]);

        // Streams of a Contents array are read back to back.
        let bytes = raw.get_page_content(page_id).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("\nq\nBT"), "{:?}", text);
        assert!(text.contains("ET\nQ\nq\n"), "{:?}", text);

        // Fonts inherited from the page tree must still resolve on the page.
        let resources = page.get(b"Resources").unwrap().deref(&raw).unwrap();
        let resources = resources.as_dict().unwrap();
        assert!(resources.has(b"Font"));
        assert!(resources.has(b"XObject"));
    }

    fn overlay_matrix(raw: &Document, page_id: ObjectId) -> Vec<f64> {
        let content = raw.get_and_decode_page_content(page_id).unwrap();
        let cm = content
            .operations
            .iter()
            .rfind(|op| op.operator == "cm")
            .unwrap();
        cm.operands.iter().map(|o| number(o).unwrap()).collect()
    }

    #[test]
    fn overlay_covers_upright_page() {
        let mut doc = SigningDocument::load_mem(&sample_pdf(1)).unwrap();
        doc.add_overlay(0, Cursor::new(stroke_png(979, 1267))).unwrap();
        let raw = doc.finished();
        let page_id = raw.get_pages()[&1];
        assert_eq!(
            overlay_matrix(&raw, page_id),
            vec![612.0, 0.0, 0.0, 792.0, 0.0, 0.0]
        );
    }

    #[test]
    fn overlay_follows_page_rotation() {
        let mut raw = Document::load_mem(&sample_pdf(1)).unwrap();
        let page_id = raw.get_pages()[&1];
        raw.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Rotate", 90);
        let mut doc = SigningDocument::new(raw);
        assert_eq!(doc.page_rotation(page_id).unwrap(), 90);

        // Landscape, as the rotated page is rendered.
        doc.add_overlay(0, Cursor::new(stroke_png(1267, 979))).unwrap();
        let raw = doc.finished();
        // Image x runs up the page, image y runs right to left.
        assert_eq!(
            overlay_matrix(&raw, page_id),
            vec![0.0, 792.0, -612.0, 0.0, 612.0, 0.0]
        );
    }

    #[test]
    fn rotation_is_inherited_and_normalized() {
        let mut raw = Document::load_mem(&sample_pdf(1)).unwrap();
        let page_id = raw.get_pages()[&1];
        let pages_id = raw.catalog().unwrap().get(b"Pages").unwrap().as_reference().unwrap();
        raw.get_object_mut(pages_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Rotate", -90);
        let doc = SigningDocument::new(raw);
        assert_eq!(doc.page_rotation(page_id).unwrap(), 270);
    }

    #[test]
    fn placement_maps_corners_for_each_rotation() {
        let rect = Rectangle {
            x1: 10.0,
            y1: 20.0,
            x2: 110.0,
            y2: 220.0,
        };
        let apply = |m: [f64; 6], u: f64, v: f64| (m[0] * u + m[2] * v + m[4], m[1] * u + m[3] * v + m[5]);
        // Top-left corner of the displayed image, per rotation.
        let top_left = [(0, (10.0, 220.0)), (90, (10.0, 20.0)), (180, (110.0, 20.0)), (270, (110.0, 220.0))];
        for (rotation, expected) in top_left {
            assert_eq!(apply(rect.placement(rotation), 0.0, 1.0), expected, "rotation {}", rotation);
        }
        assert_eq!(rect.placement(45), rect.placement(0));
    }

    #[test]
    fn blank_overlay_leaves_page_untouched() {
        let mut doc = SigningDocument::load_mem(&sample_pdf(1)).unwrap();
        let added = doc.add_overlay(0, Cursor::new(blank_png(40, 40))).unwrap();
        assert!(added.is_none());
        assert_eq!(doc.overlays_added(), 0);
    }

    #[test]
    fn page_out_of_range() {
        let mut doc = SigningDocument::load_mem(&sample_pdf(1)).unwrap();
        let err = doc
            .add_overlay(3, Cursor::new(stroke_png(10, 10)))
            .unwrap_err();
        assert!(matches!(err, Error::PageOutOfRange { index: 3, count: 1 }));
    }

    #[test]
    fn signed_document_round_trips_through_bytes() {
        let mut doc = SigningDocument::load_mem(&sample_pdf(1)).unwrap();
        doc.add_overlay(0, Cursor::new(stroke_png(100, 130))).unwrap();
        let bytes = doc.to_bytes().unwrap();
        let reloaded = SigningDocument::load_mem(&bytes).unwrap();
        assert_eq!(reloaded.page_count(), 1);
    }
}
