// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Well-known topics exchanged between the platform's services.
//!
//! Topics are plain strings agreed upon out of band; these constants only spare
//! callers from repeating them. Payload shapes are owned by the services.

pub const PROBAND_CREATED: &str = "proband.created";
pub const PROBAND_DELETED: &str = "proband.deleted";
pub const PROBAND_DEACTIVATED: &str = "proband.deactivated";
pub const PROBAND_LOGGED_IN: &str = "proband.logged_in";
pub const PROBAND_EMAIL_VERIFIED: &str = "proband.email_verified";
pub const PROBAND_REGISTERED: &str = "proband.registered";
pub const COMPLIANCE_CREATED: &str = "compliance.created";
pub const QUESTIONNAIRE_INSTANCE_CREATED: &str = "questionnaire_instance.created";
pub const QUESTIONNAIRE_INSTANCE_ACTIVATED: &str = "questionnaire_instance.activated";
pub const QUESTIONNAIRE_INSTANCE_RELEASED: &str = "questionnaire_instance.released";
pub const QUESTIONNAIRE_INSTANCE_EXPIRED: &str = "questionnaire_instance.expired";
pub const FEEDBACKSTATISTIC_CONFIGURATION_UPDATED: &str =
    "feedbackstatistic.configuration_updated";
pub const FEEDBACKSTATISTIC_OUTDATED: &str = "feedbackstatistic.outdated";
pub const STUDY_DELETED: &str = "study.deleted";

/// Every topic above.
pub const ALL: &[&str] = &[
    PROBAND_CREATED,
    PROBAND_DELETED,
    PROBAND_DEACTIVATED,
    PROBAND_LOGGED_IN,
    PROBAND_EMAIL_VERIFIED,
    PROBAND_REGISTERED,
    COMPLIANCE_CREATED,
    QUESTIONNAIRE_INSTANCE_CREATED,
    QUESTIONNAIRE_INSTANCE_ACTIVATED,
    QUESTIONNAIRE_INSTANCE_RELEASED,
    QUESTIONNAIRE_INSTANCE_EXPIRED,
    FEEDBACKSTATISTIC_CONFIGURATION_UPDATED,
    FEEDBACKSTATISTIC_OUTDATED,
    STUDY_DELETED,
];
