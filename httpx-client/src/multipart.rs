//! `multipart/form-data` request bodies.
//!
//! The form is encoded once into a single buffer, so a multipart body is
//! replayed across retries like any other byte body.
//!
//! ```rust
//! use httpx_client::multipart::{FormFile, Multipart};
//!
//! let form = Multipart::new()
//!     .text("title", "my report")
//!     .file(FormFile::new("file", "report.txt", "report content here"));
//!
//! assert!(form.content_type().starts_with("multipart/form-data; boundary="));
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// A file part of a multipart form.
#[derive(Debug, Clone)]
pub struct FormFile {
    field_name: String,
    file_name: String,
    content_type: Option<String>,
    content: Bytes,
}

impl FormFile {
    /// Create a file part. The content type is guessed from `file_name`
    /// unless set with [`with_content_type`](Self::with_content_type).
    pub fn new(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            content_type: None,
            content: content.into(),
        }
    }

    /// Set the part's content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The form field name.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// The file name sent to the server.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The content type sent for this part.
    pub fn content_type(&self) -> String {
        match &self.content_type {
            Some(content_type) => content_type.clone(),
            None => mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .to_string(),
        }
    }
}

/// A `multipart/form-data` form of text fields and files.
///
/// Text fields are written before files, each in insertion order.
#[derive(Debug, Clone)]
pub struct Multipart {
    boundary: String,
    fields: Vec<(String, String)>,
    files: Vec<FormFile>,
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

impl Multipart {
    /// Create an empty form with a random boundary.
    pub fn new() -> Self {
        Self {
            boundary: format!("httpx-{}", Uuid::new_v4().simple()),
            fields: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Create a form from text fields and files.
    pub fn from_parts<I, K, V>(fields: I, files: impl IntoIterator<Item = FormFile>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut form = Self::new();
        form.fields = fields
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        form.files = files.into_iter().collect();
        form
    }

    /// Use a fixed boundary.
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Add a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Add a file.
    pub fn file(mut self, file: FormFile) -> Self {
        self.files.push(file);
        self
    }

    /// Get the boundary.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The `Content-Type` header value for this form.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Encode the form into a request body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        for (name, value) in &self.fields {
            self.put_delimiter(&mut buf);
            buf.put_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    escape_quotes(name)
                )
                .as_bytes(),
            );
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }

        for file in &self.files {
            self.put_delimiter(&mut buf);
            buf.put_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    escape_quotes(&file.field_name),
                    escape_quotes(&file.file_name),
                    file.content_type()
                )
                .as_bytes(),
            );
            buf.put_slice(&file.content);
            buf.put_slice(b"\r\n");
        }

        buf.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        buf.freeze()
    }

    fn put_delimiter(&self, buf: &mut BytesMut) {
        buf.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }
}

fn escape_quotes(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_fields_then_files() {
        let form = Multipart::new()
            .with_boundary("XYZ")
            .file(FormFile::new("file", "report.txt", "report content here"))
            .text("title", "my report");

        let encoded = form.encode();
        assert_eq!(
            std::str::from_utf8(&encoded).unwrap(),
            "--XYZ\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             my report\r\n\
             --XYZ\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"report.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             report content here\r\n\
             --XYZ--\r\n"
        );
        assert_eq!(form.content_type(), "multipart/form-data; boundary=XYZ");
    }

    #[test]
    fn test_content_type_guess_and_override() {
        let guessed = FormFile::new("avatar", "me.png", vec![0u8; 4]);
        assert_eq!(guessed.content_type(), "image/png");

        let unknown = FormFile::new("blob", "data.unknownext", vec![1u8]);
        assert_eq!(unknown.content_type(), "application/octet-stream");

        let explicit = FormFile::new("doc", "notes.txt", "x").with_content_type("text/markdown");
        assert_eq!(explicit.content_type(), "text/markdown");
    }

    #[test]
    fn test_quotes_in_names_are_escaped() {
        let form = Multipart::new()
            .with_boundary("b")
            .file(FormFile::new("f", "say \"hi\".txt", "x"));

        let encoded = String::from_utf8(form.encode().to_vec()).unwrap();
        assert!(encoded.contains("filename=\"say \\\"hi\\\".txt\""));
    }

    #[test]
    fn test_boundaries_are_unique() {
        assert_ne!(Multipart::new().boundary(), Multipart::new().boundary());
    }
}
