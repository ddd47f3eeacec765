//! Pipeline result types.

/// How one UID left the pipeline. Every variant marks the UID as handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Classified as a job offer and the reply was submitted.
    Replied { to: String },
    /// Classified as something other than a job offer.
    NotAnOffer,
    /// The UID disappeared before it could be fetched.
    FetchFailed { reason: String },
    /// No sender, no readable body, or not MIME at all.
    Unreadable { reason: String },
    /// Classified as a job offer but the relay refused the reply.
    DispatchFailed { reason: String },
    /// Sent from the watched account itself.
    SelfSent,
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Replied { .. } => "replied",
            Self::NotAnOffer => "not_an_offer",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::Unreadable { .. } => "unreadable",
            Self::DispatchFailed { .. } => "dispatch_failed",
            Self::SelfSent => "self_sent",
        }
    }
}
