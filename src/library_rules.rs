//! Fixed Robot Framework library rule bundles (C0d).
//!
//! Two hand-written bundles — one per [`crate::config::RobotLibrary`] variant — feed C3 tier 1
//! (core rules, always included) and the tier-4 full-context fallback. They never mix: a run
//! configured for `selenium` never sees `browser`-flavored instructions and vice versa.

use crate::config::RobotLibrary;

/// One library's fixed text bundles, keyed by the role that consumes them.
pub struct LibraryRules {
    /// ~300 token always-included block: minimal-syntax dos/don'ts, initialization sequence,
    /// common pitfalls. Included by C3 tier 1 regardless of retrieval outcome.
    pub core_rules: &'static str,
    /// Full fallback context handed to the planner agent when both the predicted-keyword tier
    /// and the zero-context tier fail.
    pub planning_context: &'static str,
    /// Full fallback context handed to the assembler agent.
    pub code_assembly_context: &'static str,
    /// Full fallback context handed to the validator agent.
    pub validation_rules: &'static str,
}

const SELENIUM_CORE_RULES: &str = "\
Library: SeleniumLibrary.
Always start with `Open Browser    ${URL}    ${BROWSER}` before any other keyword.
Locate elements with `id:`, `css:`, or `xpath:` prefixes; avoid bare tag selectors.
Close the browser in a `Teardown` under `*** Settings ***`, never inline in the test body.
Do not invent keyword names; only use keywords documented in the provided context or returned \
by the search tool.";

const SELENIUM_PLANNING_CONTEXT: &str = "\
You are planning a SeleniumLibrary test. Break the request into atomic browser actions: \
navigate, locate, interact, assert. Each step should name exactly one keyword-sized action. \
Do not plan implementation details (locator strategies) — that is the Element Identifier's job.";

const SELENIUM_CODE_ASSEMBLY_CONTEXT: &str = "\
Assemble a complete *** Settings ***, *** Variables ***, *** Test Cases *** script for \
SeleniumLibrary. Declare `${URL}` and `${BROWSER}` in *** Variables ***. One test case per \
planned scenario. Use the locators supplied by the Element Identifier verbatim.";

const SELENIUM_VALIDATION_RULES: &str = "\
Validate that the script: opens a browser before interacting with it, closes the browser in \
teardown, uses only documented SeleniumLibrary keywords, and that every locator referenced in \
the test body was declared in *** Variables ***. Return valid=false with a specific reason for \
the first rule violated.";

const BROWSER_CORE_RULES: &str = "\
Library: Browser (Playwright-backed).
Always start with `New Browser` then `New Context` then `New Page` before interacting.
Prefer role-based and text-based selectors over raw CSS when the probing collaborator supplies \
them.
Close the browser in a `Teardown` under *** Settings ***, never inline in the test body.
Do not invent keyword names; only use keywords documented in the provided context or returned \
by the search tool.";

const BROWSER_PLANNING_CONTEXT: &str = "\
You are planning a Browser library test. Break the request into atomic actions: navigate, \
locate, interact, assert. Each step should name exactly one keyword-sized action. Do not plan \
implementation details (selector strategies) — that is the Element Identifier's job.";

const BROWSER_CODE_ASSEMBLY_CONTEXT: &str = "\
Assemble a complete *** Settings ***, *** Variables ***, *** Test Cases *** script for the \
Browser library. Declare `${URL}` in *** Variables ***. One test case per planned scenario. Use \
the locators supplied by the Element Identifier verbatim.";

const BROWSER_VALIDATION_RULES: &str = "\
Validate that the script: opens a new browser/context/page before interacting with it, closes \
the browser in teardown, uses only documented Browser library keywords, and that every locator \
referenced in the test body was declared in *** Variables ***. Return valid=false with a \
specific reason for the first rule violated.";

/// Return the fixed rules bundle for `library`. Never fails — both bundles are compiled in.
pub fn rules_for(library: RobotLibrary) -> LibraryRules {
    match library {
        RobotLibrary::Selenium => LibraryRules {
            core_rules: SELENIUM_CORE_RULES,
            planning_context: SELENIUM_PLANNING_CONTEXT,
            code_assembly_context: SELENIUM_CODE_ASSEMBLY_CONTEXT,
            validation_rules: SELENIUM_VALIDATION_RULES,
        },
        RobotLibrary::Browser => LibraryRules {
            core_rules: BROWSER_CORE_RULES,
            planning_context: BROWSER_PLANNING_CONTEXT,
            code_assembly_context: BROWSER_CODE_ASSEMBLY_CONTEXT,
            validation_rules: BROWSER_VALIDATION_RULES,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundles_never_mix() {
        let selenium = rules_for(RobotLibrary::Selenium);
        let browser = rules_for(RobotLibrary::Browser);
        assert!(selenium.core_rules.contains("SeleniumLibrary"));
        assert!(!selenium.core_rules.contains("Playwright"));
        assert!(browser.core_rules.contains("Playwright"));
        assert!(!browser.core_rules.contains("SeleniumLibrary"));
    }
}
