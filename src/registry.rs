// ABOUTME: Endpoint registry mapping MarketSharp feed names to entity schemas
// ABOUTME: The entity field tables are plain data; adding an endpoint is a table entry

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::mapping::{EntitySchema, FieldDescriptor, FieldType, SchemaError};
use crate::mapping::FieldType as T;

/// Public OData service root for the MarketSharp API.
pub const API_BASE_URL: &str = "https://api4.marketsharpm.com/WcfDataService.svc";

/// Column that incremental endpoints use as their watermark.
const WATERMARK_COLUMN: &str = "last_update";

/// One pullable feed: where it lives and how its entries map to rows.
#[derive(Debug, Clone)]
pub struct EndpointDescriptor {
    pub name: String,
    pub url: String,
    pub schema: Arc<EntitySchema>,
    /// Incremental endpoints resume from the store's max `last_update`;
    /// static reference endpoints are re-read in full on every run.
    pub incremental: bool,
}

impl EndpointDescriptor {
    pub fn has_primary_key(&self) -> bool {
        self.schema.has_primary_key()
    }
}

/// Read-only table of endpoints, built once at start-up.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    endpoints: Vec<EndpointDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the full MarketSharp registry with feeds rooted at `base_url`.
    pub fn marketsharp(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        let mut registry = Self::new();
        for entity in ENTITIES {
            let schema = entity
                .schema()
                .with_context(|| format!("Invalid schema for endpoint '{}'", entity.name))?;
            registry.register(EndpointDescriptor {
                name: entity.name.to_string(),
                url: format!("{}/{}", base_url, entity.entity_set),
                schema: Arc::new(schema),
                incremental: entity.incremental,
            })?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, endpoint: EndpointDescriptor) -> Result<()> {
        if self.get(&endpoint.name).is_some() {
            bail!("Endpoint '{}' is already registered", endpoint.name);
        }
        if endpoint.incremental && endpoint.schema.watermark_column().is_none() {
            bail!(
                "Endpoint '{}' is incremental but its schema has no watermark column",
                endpoint.name
            );
        }
        self.endpoints.push(endpoint);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.endpoints.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Resolve the run scope: one named endpoint, or all of them in order.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&EndpointDescriptor>> {
        match name {
            None => Ok(self.endpoints.iter().collect()),
            Some(name) => match self.get(name) {
                Some(endpoint) => Ok(vec![endpoint]),
                None => bail!(
                    "Unknown endpoint '{}'. Valid endpoints: {}",
                    name,
                    self.names().join(", ")
                ),
            },
        }
    }
}

enum Rule {
    Key,
    Optional,
    Flag(bool),
    Text(&'static str),
}

struct Column {
    tag: &'static str,
    column: &'static str,
    ty: FieldType,
    rule: Rule,
}

impl Column {
    fn descriptor(&self) -> FieldDescriptor {
        let descriptor = FieldDescriptor::new(self.tag, self.column, self.ty);
        match self.rule {
            Rule::Key => descriptor.required().primary_key(),
            Rule::Optional => descriptor,
            Rule::Flag(value) => descriptor.with_default(value),
            Rule::Text(value) => descriptor.with_default(value),
        }
    }
}

const fn key(tag: &'static str, column: &'static str, ty: FieldType) -> Column {
    Column {
        tag,
        column,
        ty,
        rule: Rule::Key,
    }
}

const fn optional(tag: &'static str, column: &'static str, ty: FieldType) -> Column {
    Column {
        tag,
        column,
        ty,
        rule: Rule::Optional,
    }
}

const fn flag(tag: &'static str, column: &'static str, default: bool) -> Column {
    Column {
        tag,
        column,
        ty: FieldType::Bool,
        rule: Rule::Flag(default),
    }
}

const fn text_or(tag: &'static str, column: &'static str, default: &'static str) -> Column {
    Column {
        tag,
        column,
        ty: FieldType::String,
        rule: Rule::Text(default),
    }
}

struct Entity {
    name: &'static str,
    kind: &'static str,
    entity_set: &'static str,
    incremental: bool,
    columns: &'static [Column],
}

impl Entity {
    fn schema(&self) -> std::result::Result<EntitySchema, SchemaError> {
        let mut builder = EntitySchema::builder(self.kind, self.name);
        for column in self.columns {
            builder = builder.field(column.column, column.descriptor());
        }
        if self.incremental {
            builder = builder.watermark(WATERMARK_COLUMN);
        }
        builder.build()
    }
}

const ACTIVITIES: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("contactId", "contact_id", T::Uuid),
    optional("name", "name", T::String),
    optional("type", "type", T::String),
    optional("completedDate", "completed_date", T::DateTime),
    optional("dueDate", "due_date", T::DateTime),
    optional("reminderMinutes", "reminder_minutes", T::Int),
    optional("notes", "notes", T::String),
    optional("appointmentId", "appointment_id", T::Uuid),
    optional("assignToEmployeeId", "assign_to_employee_id", T::Uuid),
    optional("scheduledByEmployeeId", "scheduled_by_employee_id", T::Uuid),
    flag("reminderDismissed", "reminder_dismissed", false),
    flag("isActive", "is_active", true),
    text_or("lastUpdatedBy", "last_updated_by", ""),
    optional("lastUpdate", "last_update", T::DateTime),
    optional("createdBy", "created_by", T::String),
    optional("createdDate", "created_date", T::DateTime),
    optional("inquiryId", "inquiry_id", T::Uuid),
    optional("activityResultId", "activity_result_id", T::Int),
    optional("activityReferenceId", "activity_reference_id", T::Int),
];

const ACTIVITY_REFERENCES: &[Column] = &[
    key("id", "id", T::Int),
    optional("companyId", "company_id", T::Int),
    optional("name", "name", T::String),
    flag("inquiryRequired", "inquiry_required", false),
    flag("appointmentRequired", "appointment_required", false),
    flag("isActive", "is_active", false),
    optional("createdBy", "created_by", T::String),
    optional("createdDateUtc", "created_date_utc", T::DateTime),
    optional("lastUpdateBy", "last_update_by", T::Uuid),
    optional("lastUpdateUtc", "last_update_utc", T::DateTime),
];

const ACTIVITY_RESULTS: &[Column] = &[
    key("id", "id", T::Int),
    optional("companyId", "company_id", T::Int),
    optional("name", "name", T::String),
    flag("emailSuccess", "email_success", false),
    flag("emailFailure", "email_failure", false),
    flag("confirmed", "confirmed", false),
    flag("isActive", "is_active", true),
    optional("lastUpdateBy", "last_update_by", T::Uuid),
    optional("lastUpdate", "last_update", T::DateTime),
    optional("createdBy", "created_by", T::String),
    optional("createdDate", "created_date", T::DateTime),
    flag("countAsApptConfirmed", "count_as_appt_confirmed", false),
    flag("countAsApptCreated", "count_as_appt_created", false),
    flag("countAsContacted", "count_as_contacted", false),
];

const ADDRESSES: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("contactId", "contact_id", T::Uuid),
    optional("line1", "line1", T::String),
    optional("line2", "line2", T::String),
    optional("city", "city", T::String),
    optional("state", "state", T::String),
    optional("county", "county", T::String),
    optional("zip", "zip", T::String),
    optional("country", "country", T::String),
    optional("carrierRoute", "carrier_route", T::String),
    optional("cass", "cass", T::String),
    optional("latitude", "latitude", T::Float),
    optional("longitude", "longitude", T::Float),
    optional("zip4", "zip4", T::String),
    optional("dpbc2", "dpbc2", T::String),
    optional("barCode", "bar_code", T::String),
    flag("isActive", "is_active", true),
];

const APPOINTMENT_RESULTS: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("name", "name", T::String),
    flag("presentation", "presentation", false),
    flag("sold", "sold", false),
    flag("isActive", "is_active", true),
];

const APPOINTMENTS: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("inquiryId", "inquiry_id", T::Uuid),
    optional("salesperson1Id", "salesperson1_id", T::Uuid),
    optional("salesperson2Id", "salesperson2_id", T::Uuid),
    optional("setById", "set_by_id", T::Uuid),
    optional("resultId", "result_id", T::Uuid),
    optional("lastUpdateBy", "last_update_by", T::Uuid),
    optional("createdBy", "created_by", T::Uuid),
    optional("appointmentDate", "appointment_date", T::DateTime),
    optional("setDate", "set_date", T::DateTime),
    optional("issuedDate", "issued_date", T::DateTime),
    optional("note", "note", T::String),
    optional("subject", "subject", T::String),
    optional("type", "type", T::String),
    optional("resultReason", "result_reason", T::String),
    flag("isActive", "is_active", true),
    optional("lastUpdate", "last_update", T::DateTime),
    optional("createdDate", "created_date", T::DateTime),
];

const COMPANIES: &[Column] = &[
    key("id", "id", T::Int),
    optional("number", "number", T::Int),
    optional("name", "name", T::String),
    optional("owner", "owner", T::String),
    optional("addressLine1", "address_line1", T::String),
    optional("addressLine2", "address_line2", T::String),
    optional("addressCity", "address_city", T::String),
    optional("addressState", "address_state", T::String),
    optional("addressZip", "address_zip", T::String),
    optional("email", "email", T::String),
    optional("website", "website", T::String),
    optional("contactName", "contact_name", T::String),
    optional("contactTitle", "contact_title", T::String),
    optional("phone", "phone", T::String),
    optional("fax", "fax", T::String),
    optional("timeZone", "time_zone", T::String),
];

const CONTACT_PHONES: &[Column] = &[
    key("contactId", "contact_id", T::Uuid),
    optional("assistantPhone", "assistant_phone", T::String),
    optional("workFax", "work_fax", T::String),
    optional("cellPhone", "cell_phone", T::String),
    optional("companyPhone", "company_phone", T::String),
    optional("homePhone2", "home_phone2", T::String),
    optional("homeFax", "home_fax", T::String),
    optional("pager", "pager", T::String),
    optional("workPhone2", "work_phone2", T::String),
    optional("companyFax", "company_fax", T::String),
    optional("homePhone", "home_phone", T::String),
    optional("workPhone", "work_phone", T::String),
    optional("otherPhone", "other_phone", T::String),
    optional("cellPhone2", "cell_phone2", T::String),
    optional("otherPhone2", "other_phone2", T::String),
];

const CONTACT_TYPES: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("contactId", "contact_id", T::Uuid),
    optional("contactType", "contact_type", T::String),
    flag("isActive", "is_active", true),
];

const CUSTOM_FIELDS: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("name", "name", T::String),
    optional("value", "value", T::String),
    optional("contactId", "contact_id", T::Uuid),
];

const EMPLOYEES: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("name", "name", T::String),
    flag("isActive", "is_active", true),
    optional("lastUpdate", "last_update", T::DateTime),
    optional("companyId", "company_id", T::Int),
];

const INQUIRIES: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("contactId", "contact_id", T::Uuid),
    optional("description", "description", T::String),
    optional("inquirySourcePrimaryId", "inquiry_source_primary_id", T::Uuid),
    optional("inquirySourceSecondaryId", "inquiry_source_secondary_id", T::Uuid),
    optional("creationDate", "creation_date", T::DateTime),
    optional("inquiryDate", "inquiry_date", T::DateTime),
    optional("setDate", "set_date", T::DateTime),
    optional("note", "note", T::String),
    optional("promoterId", "promoter_id", T::Uuid),
    optional("canvasserId", "canvasser_id", T::Uuid),
    optional("telemarketerId", "telemarketer_id", T::Uuid),
    optional("jobSiteAddressLine1", "job_site_address_line1", T::String),
    optional("jobSiteAddressLine2", "job_site_address_line2", T::String),
    optional("jobSiteCity", "job_site_city", T::String),
    optional("jobSiteState", "job_site_state", T::String),
    optional("jobSiteZip", "job_site_zip", T::String),
    optional("jobSiteDirections", "job_site_directions", T::String),
    flag("isActive", "is_active", true),
    optional("setById", "set_by_id", T::Uuid),
    optional("division", "division", T::String),
    optional("inquiryStatusId", "inquiry_status_id", T::Int),
    optional("lastUpdateBy", "last_update_by", T::Uuid),
    optional("lastUpdate", "last_update", T::DateTime),
    optional("createdBy", "created_by", T::String),
    optional("createdDate", "created_date", T::DateTime),
];

const INQUIRY_SOURCE_PRIMARIES: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("name", "name", T::String),
    flag("isActive", "is_active", true),
    optional("companyId", "company_id", T::Int),
];

const INQUIRY_SOURCE_SECONDARIES: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("inquirySourcePrimaryId", "inquiry_source_primary_id", T::Uuid),
    optional("name", "name", T::String),
    flag("isActive", "is_active", true),
    optional("companyId", "company_id", T::Int),
];

const INQUIRY_STATUSES: &[Column] = &[
    key("id", "id", T::Int),
    optional("companyId", "company_id", T::Int),
    optional("name", "name", T::String),
    flag("isActive", "is_active", true),
    optional("lastUpdateBy", "last_update_by", T::Uuid),
    optional("lastUpdateUtc", "last_update_utc", T::DateTime),
    optional("createdBy", "created_by", T::String),
    optional("createdDateUtc", "created_date_utc", T::DateTime),
];

const JOBS: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("contactId", "contact_id", T::Uuid),
    optional("inquiryId", "inquiry_id", T::Uuid),
    optional("site", "site", T::String),
    optional("number", "number", T::String),
    optional("name", "name", T::String),
    optional("description", "description", T::String),
    optional("type", "type", T::String),
    optional("status", "status", T::String),
    optional("addressLine1", "address_line1", T::String),
    optional("addressLine2", "address_line2", T::String),
    optional("city", "city", T::String),
    optional("state", "state", T::String),
    optional("zip", "zip", T::String),
    optional("structureValueCode", "structure_value_code", T::String),
    optional("note", "note", T::String),
    optional("startDate", "start_date", T::DateTime),
    optional("saleDate", "sale_date", T::DateTime),
    optional("completedDate", "completed_date", T::DateTime),
    optional("appointmentId", "appointment_id", T::Uuid),
    flag("isActive", "is_active", true),
    optional("lastUpdate", "last_update", T::DateTime),
    optional("createdDate", "created_date", T::DateTime),
    flag("exportedToGuildQuality", "exported_to_guild_quality", false),
];

const PRODUCT_DETAILS: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("productTypeId", "product_type_id", T::Uuid),
    optional("name", "name", T::String),
    flag("isActive", "is_active", true),
    optional("companyId", "company_id", T::Int),
];

const PRODUCT_INTERESTS: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("inquiryId", "inquiry_id", T::Uuid),
    optional("productTypeId", "product_type_id", T::Uuid),
    optional("productDetailId", "product_detail_id", T::Uuid),
    optional("priceQuoted", "price_quoted", T::Decimal),
    flag("isActive", "is_active", true),
    optional("lastUpdate", "last_update", T::DateTime),
];

const PRODUCT_TYPES: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("name", "name", T::String),
    flag("isActive", "is_active", true),
    optional("companyId", "company_id", T::Int),
];

const PROSPECTS: &[Column] = &[
    key("id", "id", T::Uuid),
    optional("companyId", "company_id", T::Int),
    optional("firstName", "first_name", T::String),
    optional("lastName", "last_name", T::String),
    optional("middleInitial", "middle_initial", T::String),
    optional("title", "title", T::String),
    optional("incomeCode", "income_code", T::String),
    optional("ageCode", "age_code", T::String),
    optional("structureAgeCode", "structure_age_code", T::String),
    optional("reference", "reference", T::String),
    optional("businessName", "business_name", T::String),
    optional("contactPhoneId", "contact_phone_id", T::Uuid),
    optional("primaryAddressId", "primary_address_id", T::Uuid),
    optional("website1", "website1", T::String),
    optional("website2", "website2", T::String),
    optional("website3", "website3", T::String),
    optional("email1", "email1", T::String),
    flag("email1CanMail", "email1_can_mail", false),
    optional("email2", "email2", T::String),
    flag("email2CanMail", "email2_can_mail", false),
    optional("email3", "email3", T::String),
    flag("email3CanMail", "email3_can_mail", false),
    optional("isTagged", "is_tagged", T::Bool),
    optional("structureValueCode", "structure_value_code", T::String),
    flag("doNotMail", "do_not_mail", false),
    optional("yearHomeBuilt", "year_home_built", T::String),
    optional("maritalStatus", "marital_status", T::String),
    optional("lengthOfResidence", "length_of_residence", T::String),
    optional("styleOfHome", "style_of_home", T::String),
    optional("mailMergeName", "mail_merge_name", T::String),
    optional("source", "source", T::String),
    optional("creationDate", "creation_date", T::DateTime),
    optional("qbSyncDate", "qb_sync_date", T::DateTime),
    optional("qbId", "qb_id", T::String),
    flag("isActive", "is_active", true),
    optional("lastUpdate", "last_update", T::DateTime),
    flag("hasDncPhone", "has_dnc_phone", false),
    flag("hasDneEmail", "has_dne_email", false),
    optional("qbEditSequence", "qb_edit_sequence", T::String),
    optional("qbSyncData", "qb_sync_data", T::Bool),
    optional("qbName", "qb_name", T::String),
    optional("createdDate", "created_date", T::DateTime),
];

const ENTITIES: &[Entity] = &[
    Entity {
        name: "activities",
        kind: "Activity",
        entity_set: "Activities",
        incremental: true,
        columns: ACTIVITIES,
    },
    Entity {
        name: "activity_references",
        kind: "ActivityReference",
        entity_set: "ActivityReferences",
        incremental: false,
        columns: ACTIVITY_REFERENCES,
    },
    Entity {
        name: "activity_results",
        kind: "ActivityResult",
        entity_set: "ActivityResults",
        incremental: true,
        columns: ACTIVITY_RESULTS,
    },
    Entity {
        name: "addresses",
        kind: "Address",
        entity_set: "Addresses",
        incremental: false,
        columns: ADDRESSES,
    },
    Entity {
        name: "appointment_results",
        kind: "AppointmentResult",
        entity_set: "AppointmentResults",
        incremental: false,
        columns: APPOINTMENT_RESULTS,
    },
    Entity {
        name: "appointments",
        kind: "Appointment",
        entity_set: "Appointments",
        incremental: true,
        columns: APPOINTMENTS,
    },
    Entity {
        name: "companies",
        kind: "Company",
        entity_set: "Companies",
        incremental: false,
        columns: COMPANIES,
    },
    Entity {
        name: "contact_phones",
        kind: "ContactPhone",
        entity_set: "ContactPhones",
        incremental: false,
        columns: CONTACT_PHONES,
    },
    Entity {
        name: "contact_types",
        kind: "ContactType",
        entity_set: "ContactTypes",
        incremental: false,
        columns: CONTACT_TYPES,
    },
    Entity {
        name: "custom_fields",
        kind: "CustomField",
        entity_set: "CustomFields",
        incremental: false,
        columns: CUSTOM_FIELDS,
    },
    Entity {
        name: "employees",
        kind: "Employee",
        entity_set: "Employees",
        incremental: true,
        columns: EMPLOYEES,
    },
    Entity {
        name: "inquiries",
        kind: "Inquiry",
        entity_set: "Inquiries",
        incremental: true,
        columns: INQUIRIES,
    },
    Entity {
        name: "inquiry_source_primaries",
        kind: "InquirySourcePrimary",
        entity_set: "InquirySourcePrimaries",
        incremental: false,
        columns: INQUIRY_SOURCE_PRIMARIES,
    },
    Entity {
        name: "inquiry_source_secondaries",
        kind: "InquirySourceSecondary",
        entity_set: "InquirySourceSecondaries",
        incremental: false,
        columns: INQUIRY_SOURCE_SECONDARIES,
    },
    Entity {
        name: "inquiry_statuses",
        kind: "InquiryStatus",
        entity_set: "InquiryStatuses",
        incremental: false,
        columns: INQUIRY_STATUSES,
    },
    Entity {
        name: "jobs",
        kind: "Job",
        entity_set: "Jobs",
        incremental: true,
        columns: JOBS,
    },
    Entity {
        name: "product_details",
        kind: "ProductDetail",
        entity_set: "ProductDetails",
        incremental: false,
        columns: PRODUCT_DETAILS,
    },
    Entity {
        name: "product_interests",
        kind: "ProductInterest",
        entity_set: "ProductInterests",
        incremental: false,
        columns: PRODUCT_INTERESTS,
    },
    Entity {
        name: "product_types",
        kind: "ProductType",
        entity_set: "ProductTypes",
        incremental: false,
        columns: PRODUCT_TYPES,
    },
    Entity {
        name: "prospects",
        kind: "Prospect",
        entity_set: "Prospects",
        incremental: true,
        columns: PROSPECTS,
    },
];
