//! Template file naming rules.
//!
//! A file is a template when its name ends with [`TEMPLATE_MARKER`]. The name
//! left after stripping the marker is the output name, and its last
//! dot-delimited segment is the type key used to look up render options and
//! post-processing commands (`demo.tex.jinja` renders to `demo.tex`, type `tex`).

use super::error::DomainError;

pub const TEMPLATE_MARKER: &str = ".jinja";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFileName {
    pub output_name: String,
    pub type_key: String,
}

pub fn is_template_file_name(file_name: &str) -> bool {
    file_name.ends_with(TEMPLATE_MARKER)
}

pub fn decompose(file_name: &str) -> Result<TemplateFileName, DomainError> {
    let Some(output_name) = file_name.strip_suffix(TEMPLATE_MARKER) else {
        return Err(DomainError::invalid_template_filename(
            file_name,
            "missing template marker suffix",
        ));
    };

    let Some((_, type_key)) = output_name.rsplit_once('.') else {
        return Err(DomainError::invalid_template_filename(
            file_name,
            "no file type segment before the template marker",
        ));
    };

    if type_key.is_empty() {
        return Err(DomainError::invalid_template_filename(
            file_name,
            "file type segment is empty",
        ));
    }

    Ok(TemplateFileName {
        output_name: output_name.to_string(),
        type_key: type_key.to_string(),
    })
}
