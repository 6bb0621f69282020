// =============================================================================
// Matrixon Matrix NextServer - SSO Attribute Requirements
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Checks that an identity assertion carries every configured
//   attribute/value pair before any account is touched.
//
// =============================================================================

use matrixon_core::{AttributeRequirement, IdentityAssertion};

/// Whether the assertion lists `requirement.value` among the values of
/// `requirement.attribute`
pub fn check_attribute_requirement(
    assertion: &IdentityAssertion,
    requirement: &AttributeRequirement,
) -> bool {
    assertion
        .values(&requirement.attribute)
        .is_some_and(|values| values.iter().any(|v| *v == requirement.value))
}

/// First requirement the assertion fails, if any
pub fn first_unmet<'a>(
    assertion: &IdentityAssertion,
    requirements: &'a [AttributeRequirement],
) -> Option<&'a AttributeRequirement> {
    requirements
        .iter()
        .find(|requirement| !check_attribute_requirement(assertion, requirement))
}

/// Whether every requirement is met. An empty requirement list always passes.
pub fn satisfies(assertion: &IdentityAssertion, requirements: &[AttributeRequirement]) -> bool {
    first_unmet(assertion, requirements).is_none()
}
