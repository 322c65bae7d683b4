//! Typed requests and responses for the knowledge operations, validated
//! before any pipeline work starts.

use serde::{Deserialize, Serialize};

use crate::config::KnowledgeConfig;
use crate::document::Document;
use crate::embedding::ApiKey;
use crate::error::{KnowledgeError, Result};
use crate::retrieval::RetrievalQuery;

/// Metadata key holding the uploaded file name.
pub const FILE_NAME_KEY: &str = "file_name";

/// An uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Client-side file name, including the extension.
    pub name: String,
    /// Raw file bytes. Must be UTF-8 text.
    pub content: Vec<u8>,
}

impl UploadedFile {
    /// Create an upload from a file name and its bytes.
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), content: content.into() }
    }
}

/// `POST /knowledge`: ingest a file as a new document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateKnowledgeRequest {
    /// Credential used for the embedding calls.
    pub openai_api_key: String,
    /// The document to ingest.
    pub file: UploadedFile,
    /// Source identifier. Defaults to the file name.
    #[serde(default)]
    pub url: Option<String>,
}

/// A [`CreateKnowledgeRequest`] that passed validation.
#[derive(Debug, Clone)]
pub struct ValidCreate {
    /// The embedding credential.
    pub credential: ApiKey,
    /// The decoded document, keyed by its source identifier.
    pub document: Document,
}

impl CreateKnowledgeRequest {
    /// Check the credential and file against `config` and decode the file.
    ///
    /// # Errors
    ///
    /// [`KnowledgeError::AuthenticationError`] for a blank key, otherwise
    /// [`KnowledgeError::InvalidRequest`].
    pub fn validate(self, config: &KnowledgeConfig) -> Result<ValidCreate> {
        let credential = ApiKey::new(self.openai_api_key)?;

        let file_name = self.file.name.trim().to_string();
        if file_name.is_empty() {
            return Err(KnowledgeError::InvalidRequest("file name is required".into()));
        }
        if !config.allows_file(&file_name) {
            return Err(KnowledgeError::InvalidRequest(format!(
                "file type not allowed: '{file_name}' (allowed: {})",
                config.allowed_extensions.join(", ")
            )));
        }

        let text = String::from_utf8(self.file.content).map_err(|_| {
            KnowledgeError::InvalidRequest(format!("'{file_name}' is not valid UTF-8 text"))
        })?;
        if text.trim().is_empty() {
            return Err(KnowledgeError::InvalidRequest(format!("'{file_name}' is empty")));
        }

        let source_id = match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => file_name.clone(),
        };
        let document = Document::new(source_id, text).with_metadata(FILE_NAME_KEY, file_name);
        Ok(ValidCreate { credential, document })
    }
}

/// `DELETE /knowledge`: remove a document by source identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteKnowledgeRequest {
    /// Source identifier of the document to remove.
    pub url: String,
    /// Accepted for symmetry with the other operations; deletion needs no
    /// model call.
    #[serde(default)]
    pub openai_api_key: Option<String>,
}

impl DeleteKnowledgeRequest {
    /// The trimmed source identifier.
    pub fn validate(&self) -> Result<String> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(KnowledgeError::InvalidRequest("url is required".into()));
        }
        Ok(url.to_string())
    }
}

/// `POST /knowledge/retrieve`: answer a question from stored knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveKnowledgeRequest {
    /// Credential used for the embedding and chat calls.
    pub openai_api_key: String,
    /// The question to answer.
    pub question: String,
    /// Caller identity, used as the chat history session.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A [`RetrieveKnowledgeRequest`] that passed validation.
#[derive(Debug, Clone)]
pub struct ValidRetrieve {
    /// The model credential.
    pub credential: ApiKey,
    /// The trimmed question and caller identity.
    pub query: RetrievalQuery,
}

impl RetrieveKnowledgeRequest {
    /// Check the credential and question. Blank user ids become `None`.
    ///
    /// # Errors
    ///
    /// [`KnowledgeError::AuthenticationError`] for a blank key,
    /// [`KnowledgeError::InvalidRequest`] for a blank question.
    pub fn validate(self) -> Result<ValidRetrieve> {
        let credential = ApiKey::new(self.openai_api_key)?;
        let question = self.question.trim();
        if question.is_empty() {
            return Err(KnowledgeError::InvalidRequest("question is required".into()));
        }
        let mut query = RetrievalQuery::new(question);
        query.user_id = self.user_id.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        Ok(ValidRetrieve { credential, query })
    }
}

/// Response to create and delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeResponse {
    /// Human-readable outcome.
    pub message: String,
}

impl KnowledgeResponse {
    /// Create a response carrying `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Response to retrieve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveResponse {
    /// The generated answer, or the context when no generator is configured,
    /// or a notice when nothing is stored.
    pub message: String,
    /// Chunk texts in rank order.
    pub context: String,
    /// Source identifiers of the returned chunks, deduplicated in rank order.
    pub sources: Vec<String>,
}
