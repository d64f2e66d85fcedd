//! Account record
//!
//! The persisted per-account state shared between the setup poller, the
//! sync lock holder, and the watcher host. Lifecycle fields (`setup_complete`,
//! `transferring`, folder identity) are mutated only while holding, or on
//! behalf of, the account's sync lock; the setup poller writes only the
//! diagnostic flags it owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::AccountId;

/// Persisted state of one connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Unique identifier for this account
    id: AccountId,
    /// Identity claimed by the user at the provider (share invites are
    /// validated against this address)
    email: Option<String>,
    /// Provider-side service account performing the sharing handshake
    service_account_id: Option<String>,
    /// Provider id of the claimed shared folder (None until setup succeeds)
    folder_id: Option<String>,
    /// Display name of the claimed folder
    folder_name: Option<String>,
    /// Whether the initial transfer finished and steady-state sync is active
    setup_complete: bool,
    /// Whether the one-time initial transfer is currently running
    transferring: bool,
    /// Whether a setup attempt is in flight; flipping this off cancels it
    preparing: bool,
    /// User-visible error from the last failed setup or sync, if any
    error: Option<String>,
    /// Diagnostic: a folder was shared by the right identity but not empty
    non_empty_folder_shared: bool,
    /// Diagnostic: a folder was shared without write permission
    non_editor_permissions: bool,
    /// When the current/last setup attempt started
    started_setup: Option<DateTime<Utc>>,
    /// When the account was connected
    connected_at: DateTime<Utc>,
}

impl AccountRecord {
    /// Creates a fresh record for a newly connected account.
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            email: None,
            service_account_id: None,
            folder_id: None,
            folder_name: None,
            setup_complete: false,
            transferring: false,
            preparing: false,
            error: None,
            non_empty_folder_shared: false,
            non_editor_permissions: false,
            started_setup: None,
            connected_at: Utc::now(),
        }
    }

    // --- Getters ---

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn service_account_id(&self) -> Option<&str> {
        self.service_account_id.as_deref()
    }

    pub fn folder_id(&self) -> Option<&str> {
        self.folder_id.as_deref()
    }

    pub fn folder_name(&self) -> Option<&str> {
        self.folder_name.as_deref()
    }

    pub fn setup_complete(&self) -> bool {
        self.setup_complete
    }

    pub fn transferring(&self) -> bool {
        self.transferring
    }

    pub fn preparing(&self) -> bool {
        self.preparing
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn non_empty_folder_shared(&self) -> bool {
        self.non_empty_folder_shared
    }

    pub fn non_editor_permissions(&self) -> bool {
        self.non_editor_permissions
    }

    pub fn started_setup(&self) -> Option<DateTime<Utc>> {
        self.started_setup
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    // --- Identity ---

    /// Sets the claimed identity for folder validation.
    pub fn set_email(&mut self, email: impl Into<String>) {
        self.email = Some(email.into());
    }

    pub fn set_service_account_id(&mut self, id: impl Into<String>) {
        self.service_account_id = Some(id.into());
    }

    // --- Setup lifecycle (lock-holder fields) ---

    /// Marks the start of a setup attempt.
    pub fn begin_setup(&mut self, now: DateTime<Utc>) {
        self.preparing = true;
        self.started_setup = Some(now);
    }

    /// Clears the in-flight setup marker. Flipping `preparing` off while a
    /// setup loop is polling cancels it at the next continuation check.
    pub fn end_setup(&mut self) {
        self.preparing = false;
    }

    /// Records the claimed shared folder and clears stale diagnostics.
    pub fn claim_folder(&mut self, folder_id: impl Into<String>, folder_name: impl Into<String>) {
        self.folder_id = Some(folder_id.into());
        self.folder_name = Some(folder_name.into());
        self.non_empty_folder_shared = false;
        self.non_editor_permissions = false;
    }

    pub fn set_transferring(&mut self, transferring: bool) {
        self.transferring = transferring;
    }

    /// Marks initial transfer complete and steady-state sync active.
    pub fn mark_setup_complete(&mut self) {
        self.setup_complete = true;
        self.transferring = false;
        self.error = None;
    }

    // --- Diagnostics (poller-owned fields) ---

    pub fn set_non_empty_folder_shared(&mut self, value: bool) {
        self.non_empty_folder_shared = value;
    }

    pub fn set_non_editor_permissions(&mut self, value: bool) {
        self.non_editor_permissions = value;
    }

    // --- Errors ---

    /// Records a user-visible error string.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Clears any recorded error (benign cancellation path).
    pub fn clear_error(&mut self) {
        self.error = None;
    }
}
