//! Per-state services.
//!
//! Each service performs the side effects of entering its state (verifying
//! an identity, checking a payment, storing a Drive grant, provisioning a
//! folder) and hands all transition bookkeeping to `StateManager`.

pub mod active;
pub mod auth;
pub mod drive;
pub mod payment;
pub mod visitor;

pub use active::{
    ActiveService, FolderProvisioner, ProvisionedFolder, UploadedFile, next_folder_name,
    readme_content,
};
pub use auth::{AuthService, IdentityVerifier, SignIn, VerifiedIdentity};
pub use drive::{DriveGrant, DriveService};
pub use payment::{PaymentConfirmation, PaymentService};
pub use visitor::VisitorService;
