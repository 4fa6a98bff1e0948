use crate::error::ValidationError;
use bytes::Bytes;
use image::DynamicImage;
use std::{io::Cursor, path::Path};

pub const ACCEPTED_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

const MAX_USER_ID_LEN: usize = 128;

/// Raw form fields as they come off the wire. Every field is optional here;
/// `validate_form` decides what is required.
#[derive(Debug, Default)]
pub struct PredictionForm {
    pub user_id: Option<String>,
    pub credential_token: Option<String>,
    pub file_name: Option<String>,
    pub image: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct PredictionRequest {
    pub user_id: String,
    pub credential_token: String,
    pub file_name: String,
    pub image_bytes: Bytes,
}

/// Checks the presence of the image part and the shape of `user_id`.
/// A missing token is left for the authenticator to reject.
pub fn validate_form(form: PredictionForm) -> Result<PredictionRequest, ValidationError> {
    let image_bytes = form.image.ok_or(ValidationError::MissingField("image"))?;
    let user_id = form
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(ValidationError::MissingField("user_id"))?;
    validate_user_id(&user_id)?;

    Ok(PredictionRequest {
        user_id,
        credential_token: form.credential_token.unwrap_or_default(),
        file_name: form.file_name.unwrap_or_default(),
        image_bytes,
    })
}

/// The user id ends up in object keys, so path separators and control
/// characters are refused.
pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.chars().count() > MAX_USER_ID_LEN {
        return Err(ValidationError::InvalidUserId(format!(
            "longer than {} characters",
            MAX_USER_ID_LEN
        )));
    }
    if let Some(c) = user_id
        .chars()
        .find(|c| *c == '/' || *c == '\\' || c.is_control())
    {
        return Err(ValidationError::InvalidUserId(format!(
            "forbidden character {:?}",
            c
        )));
    }
    Ok(())
}

pub fn validate_extension(file_name: &str) -> Result<(), ValidationError> {
    let accepted = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false);

    if accepted {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedExtension(file_name.to_string()))
    }
}

pub fn decode_image(image_bytes: &[u8]) -> Result<DynamicImage, ValidationError> {
    let image_reader = image::ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .map_err(|e| ValidationError::UndecodableImage(e.to_string()))?;

    let image = image_reader
        .decode()
        .map_err(|e| ValidationError::UndecodableImage(e.to_string()))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(ValidationError::UndecodableImage(
            "image has no pixels".into(),
        ));
    }

    Ok(image)
}
