/// Generator-assigned combination identifier (UUID v4 string).
pub type CombinationId = String;

/// Identifier of a render job as assigned by the rendering backend.
pub type JobId = String;

/// Identifier of a creative asset.
pub type AssetId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
