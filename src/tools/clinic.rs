//! Veterinary clinic record tools.
//!
//! Domain record persistence is an external collaborator behind the
//! [`ClinicDirectory`] trait — the engine only sees tools that call it.
//! Each tool validates its own input so malformed model arguments come back
//! as structured errors the model can correct, instead of faults.
//!
//! [`MemoryDirectory`] is a trivial in-process implementation for tests and
//! the CLI demo; a real deployment injects its own backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::Result;

use super::{Tool, ToolContext, ToolOutcome, ToolPolicy};

/// A pet registered to an owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PetRecord {
    /// Pet name
    pub name: String,
    /// Species (dog, cat, ...)
    pub species: String,
    /// Breed, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
}

/// A consultation entry for a pet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsultationRecord {
    /// Name of the pet seen
    pub pet_name: String,
    /// Reason for the visit
    pub reason: String,
    /// Clinical notes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A vaccine application entry for a pet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaccineRecord {
    /// Name of the vaccinated pet
    pub pet_name: String,
    /// Vaccine name
    pub vaccine: String,
    /// Next due date (ISO 8601), if scheduled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due: Option<String>,
}

/// External collaborator holding clinic records per owner identity.
///
/// The engine never owns record persistence; it dispatches to whatever
/// implementation is injected here.
#[async_trait]
pub trait ClinicDirectory: Send + Sync {
    /// Register a pet for an owner.
    async fn register_pet(&self, owner: &str, pet: PetRecord) -> Result<()>;

    /// List the pets registered to an owner.
    async fn pets(&self, owner: &str) -> Result<Vec<PetRecord>>;

    /// Record a consultation for one of the owner's pets.
    async fn record_consultation(&self, owner: &str, entry: ConsultationRecord) -> Result<()>;

    /// Record a vaccine application for one of the owner's pets.
    async fn record_vaccine(&self, owner: &str, entry: VaccineRecord) -> Result<()>;
}

/// In-memory [`ClinicDirectory`] for tests and the CLI demo.
#[derive(Default)]
pub struct MemoryDirectory {
    records: RwLock<HashMap<String, OwnerRecords>>,
}

#[derive(Default)]
struct OwnerRecords {
    pets: Vec<PetRecord>,
    consultations: Vec<ConsultationRecord>,
    vaccines: Vec<VaccineRecord>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of consultations stored for an owner (for tests).
    pub async fn consultation_count(&self, owner: &str) -> usize {
        let records = self.records.read().await;
        records.get(owner).map(|r| r.consultations.len()).unwrap_or(0)
    }

    /// Number of vaccine entries stored for an owner (for tests).
    pub async fn vaccine_count(&self, owner: &str) -> usize {
        let records = self.records.read().await;
        records.get(owner).map(|r| r.vaccines.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ClinicDirectory for MemoryDirectory {
    async fn register_pet(&self, owner: &str, pet: PetRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.entry(owner.to_string()).or_default().pets.push(pet);
        Ok(())
    }

    async fn pets(&self, owner: &str) -> Result<Vec<PetRecord>> {
        let records = self.records.read().await;
        Ok(records.get(owner).map(|r| r.pets.clone()).unwrap_or_default())
    }

    async fn record_consultation(&self, owner: &str, entry: ConsultationRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry(owner.to_string())
            .or_default()
            .consultations
            .push(entry);
        Ok(())
    }

    async fn record_vaccine(&self, owner: &str, entry: VaccineRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry(owner.to_string())
            .or_default()
            .vaccines
            .push(entry);
        Ok(())
    }
}

fn require_str(args: &Value, field: &str) -> std::result::Result<(), String> {
    match args.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(format!("missing required field '{}'", field)),
    }
}

// ============================================================================
// register_pet
// ============================================================================

/// Registers a pet to the conversation's identity.
pub struct RegisterPetTool {
    directory: Arc<dyn ClinicDirectory>,
}

impl RegisterPetTool {
    /// Create the tool over a directory.
    pub fn new(directory: Arc<dyn ClinicDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for RegisterPetTool {
    fn name(&self) -> &str {
        "register_pet"
    }

    fn description(&self) -> &str {
        "Register a new pet for the current client. Requires name and species."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Pet name" },
                "species": { "type": "string", "description": "Species, e.g. dog or cat" },
                "breed": { "type": "string", "description": "Breed, if known" }
            },
            "required": ["name", "species"]
        })
    }

    fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        require_str(args, "name")?;
        require_str(args, "species")
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let pet = PetRecord {
            name: args["name"].as_str().unwrap_or_default().trim().to_string(),
            species: args["species"].as_str().unwrap_or_default().trim().to_string(),
            breed: args
                .get("breed")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string()),
        };
        self.directory.register_pet(&ctx.identity, pet.clone()).await?;
        Ok(ToolOutcome::success(json!({
            "registered": pet.name,
            "species": pet.species
        })))
    }
}

// ============================================================================
// list_pets
// ============================================================================

/// Lists the pets registered to the conversation's identity.
pub struct ListPetsTool {
    directory: Arc<dyn ClinicDirectory>,
}

impl ListPetsTool {
    /// Create the tool over a directory.
    pub fn new(directory: Arc<dyn ClinicDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for ListPetsTool {
    fn name(&self) -> &str {
        "list_pets"
    }

    fn description(&self) -> &str {
        "List the pets registered for the current client."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn policy(&self) -> ToolPolicy {
        // Read-only lookup: fail fast rather than hold a round open.
        ToolPolicy::new().with_timeout(std::time::Duration::from_secs(5))
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let pets = self.directory.pets(&ctx.identity).await?;
        Ok(ToolOutcome::success(json!({ "pets": pets })))
    }
}

// ============================================================================
// record_consultation
// ============================================================================

/// Records a consultation for one of the identity's pets.
pub struct RecordConsultationTool {
    directory: Arc<dyn ClinicDirectory>,
}

impl RecordConsultationTool {
    /// Create the tool over a directory.
    pub fn new(directory: Arc<dyn ClinicDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for RecordConsultationTool {
    fn name(&self) -> &str {
        "record_consultation"
    }

    fn description(&self) -> &str {
        "Record a consultation for one of the client's pets. Requires pet_name and reason."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pet_name": { "type": "string", "description": "Which pet was seen" },
                "reason": { "type": "string", "description": "Reason for the visit" },
                "notes": { "type": "string", "description": "Clinical notes" }
            },
            "required": ["pet_name", "reason"]
        })
    }

    fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        require_str(args, "pet_name")?;
        require_str(args, "reason")
    }

    fn policy(&self) -> ToolPolicy {
        // A write against the records backend: one retry is enough, the
        // runner's idempotency cache suppresses duplicate units of work.
        ToolPolicy::new().with_retries(1)
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let known = self.directory.pets(&ctx.identity).await?;
        let pet_name = args["pet_name"].as_str().unwrap_or_default().trim().to_string();
        if !known.iter().any(|p| p.name.eq_ignore_ascii_case(&pet_name)) {
            return Ok(ToolOutcome::failure(format!(
                "no pet named '{}' registered for this client",
                pet_name
            )));
        }
        let entry = ConsultationRecord {
            pet_name,
            reason: args["reason"].as_str().unwrap_or_default().trim().to_string(),
            notes: args
                .get("notes")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };
        self.directory
            .record_consultation(&ctx.identity, entry.clone())
            .await?;
        Ok(ToolOutcome::success(json!({
            "recorded": "consultation",
            "pet_name": entry.pet_name
        })))
    }
}

// ============================================================================
// record_vaccine
// ============================================================================

/// Records a vaccine application for one of the identity's pets.
pub struct RecordVaccineTool {
    directory: Arc<dyn ClinicDirectory>,
}

impl RecordVaccineTool {
    /// Create the tool over a directory.
    pub fn new(directory: Arc<dyn ClinicDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for RecordVaccineTool {
    fn name(&self) -> &str {
        "record_vaccine"
    }

    fn description(&self) -> &str {
        "Record a vaccine application for one of the client's pets. Requires pet_name and vaccine."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pet_name": { "type": "string", "description": "Which pet was vaccinated" },
                "vaccine": { "type": "string", "description": "Vaccine name" },
                "next_due": { "type": "string", "description": "Next due date (ISO 8601)" }
            },
            "required": ["pet_name", "vaccine"]
        })
    }

    fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        require_str(args, "pet_name")?;
        require_str(args, "vaccine")
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new().with_retries(1)
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let entry = VaccineRecord {
            pet_name: args["pet_name"].as_str().unwrap_or_default().trim().to_string(),
            vaccine: args["vaccine"].as_str().unwrap_or_default().trim().to_string(),
            next_due: args
                .get("next_due")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };
        self.directory
            .record_vaccine(&ctx.identity, entry.clone())
            .await?;
        Ok(ToolOutcome::success(json!({
            "recorded": "vaccine",
            "pet_name": entry.pet_name,
            "vaccine": entry.vaccine
        })))
    }
}
