//! Input DTOs with garde validation.
//!
//! Everything the operator types or the runtime forwards to the server goes
//! through one of these before it leaves the process.

use garde::Validate;

use crate::error::ChatError;

/// Validation constants
pub const MAX_CHAT_ID_LENGTH: usize = 256;
pub const MAX_MESSAGE_LENGTH: usize = 10000;
pub const MAX_PAGE_SIZE: u32 = 200;
pub const MAX_FILENAME_LENGTH: usize = 255;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Message bodies must carry something besides whitespace.
fn validate_not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("Message cannot be blank"));
    }
    Ok(())
}

fn validate_filename(value: &str, _ctx: &()) -> garde::Result {
    if value.contains(['/', '\\']) || value.chars().any(|c| c.is_control()) {
        return Err(garde::Error::new("Invalid file name"));
    }
    Ok(())
}

fn validate_upload_size(value: &usize, _ctx: &()) -> garde::Result {
    if *value == 0 {
        return Err(garde::Error::new("File is empty"));
    }
    if *value > MAX_UPLOAD_BYTES {
        return Err(garde::Error::new("File too large"));
    }
    Ok(())
}

/// Input for an outbound chat message
#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct SendMessageInput {
    #[garde(length(min = 1, max = MAX_CHAT_ID_LENGTH))]
    pub chat_id: String,
    #[garde(length(max = MAX_MESSAGE_LENGTH), custom(validate_not_blank))]
    pub content: String,
}

/// Input for a page of history
#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct PageRequest {
    #[garde(length(min = 1, max = MAX_CHAT_ID_LENGTH))]
    pub chat_id: String,
    #[garde(range(min = 1, max = MAX_PAGE_SIZE))]
    pub limit: u32,
    #[garde(skip)]
    pub offset: u32,
}

/// Input for a file upload
#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct UploadInput {
    #[garde(length(min = 1, max = MAX_FILENAME_LENGTH), custom(validate_filename))]
    pub filename: String,
    #[garde(custom(validate_upload_size))]
    pub size: usize,
}

/// Helper trait to convert garde validation errors into [`ChatError`]
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), ChatError>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), ChatError> {
        self.validate()
            .map_err(|e| ChatError::Validation(e.to_string()))
    }
}
