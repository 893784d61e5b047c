//! Embed vocabulary shared by the ingestion side and the checker pool.

pub mod checker;
pub mod redirect;

/// One embedded item found on a post.
#[derive(Debug, Clone)]
pub enum Embed {
    /// Embedded image, by content identifier
    Image { cid: String },
    /// Embedded video, by content identifier
    Video { cid: String },
    /// Quoted record, by AT-URI
    Record { uri: String },
    /// External link card
    External { uri: String },
}

/// The embeds of one post, queued as a unit for the checker pool.
#[derive(Debug, Clone)]
pub struct EmbedInfoList {
    /// Repository (account) DID the post belongs to
    pub did: String,
    /// Record path within the repository
    pub path: String,
    pub embeds: Vec<Embed>,
}
