//! Organizer- and volunteer-facing operations on shiva support pages.

pub mod access;
pub mod co_organizers;
pub mod registry;
pub mod scheduler;
pub mod updates;
pub mod validate;

pub use access::{AccessBroker, AccessRequestInput, Decision, RequestIssued, RequestOutcome};
pub use co_organizers::{AcceptOutcome, CoOrganizerDirectory, CoOrganizerSummary, InviteIssued, InviteRequest};
pub use registry::{
    CreateOutcome, NewPageRequest, OrganizerPage, PageUpdateRequest, PublicPage, ReportRequest, SimilarPage,
    SupportRegistry, UpdateOutcome, VerifyOutcome,
};
pub use scheduler::{
    DateError, DaySlots, MealScheduler, MultiSignupOutcome, MultiSignupRequest, PublicSignup, SignupConfirmed,
    SignupRejection, SignupRequest,
};
pub use updates::{ThankYouDispatch, UpdateBoard, Volunteer};
