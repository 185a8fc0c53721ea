//! Credential routing per organization plus the single review identity.

pub mod org;
pub mod router;

pub use org::{extract_organization, RepoRef};
pub use router::{
    parse_org_token_list, Credential, EnvTokenSource, MissingCredential, OrganizationRoute,
    RouteTable, StaticTokenSource, TokenError, TokenRouter, TokenSource, TokenValidation,
};
