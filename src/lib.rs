//! Arclight: streaming web-archive replay.
//!
//! The crate decodes replay URLs (`<prefix>/<ts><mod>/<original-url>`),
//! resolves them against a capture [`Store`], rewrites archived HTML on the
//! fly so it loads inside the replay frame, and serves the result over HTTP.

pub mod collection;
pub mod error;
pub mod notify;
pub mod replay_url;
pub mod response;
pub mod rewrite;
pub mod server;
pub mod store;
pub mod util;

pub use collection::{Collection, CollectionConfig, Prefixes, ReplayRequest, DEFAULT_CSP};
pub use error::Error;
pub use notify::{AuthNotifier, LogNotifier};
pub use replay_url::ReplayUrl;
pub use response::ArchiveResponse;
pub use rewrite::{
    CssRewriter, DocTransforms, HtmlRewriter, JsRewriter, NoopTransforms, PrefixRewriter,
    PrefixTransforms, RewriteOpts, Rewriter, TransformFactory, UrlRewriter,
};
pub use server::{build_router, run_server, AppState, ServerConfig};
pub use store::{Capture, MemoryStore, PageEntry, ResourceQuery, Store, StoreError};
