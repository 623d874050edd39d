use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    #[default]
    #[serde(alias = "CSS_SELECTOR", alias = "css_selector")]
    Css,
    #[serde(alias = "XPATH")]
    Xpath,
    #[serde(alias = "ID")]
    Id,
    #[serde(alias = "CLASS_NAME")]
    ClassName,
    #[serde(alias = "NAME")]
    Name,
    #[serde(alias = "TAG_NAME")]
    TagName,
    #[serde(alias = "LINK_TEXT")]
    LinkText,
    #[serde(alias = "PARTIAL_LINK_TEXT")]
    PartialLinkText,
}

/// What a driver actually evaluates: every strategy lowers to CSS or XPath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Css(String),
    XPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    #[serde(default)]
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    pub fn new(strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::Css, value)
    }

    pub fn query(&self) -> Query {
        let value = self.value.as_str();
        match self.strategy {
            LocatorStrategy::Css => Query::Css(value.to_string()),
            LocatorStrategy::Xpath => Query::XPath(value.to_string()),
            LocatorStrategy::Id => Query::Css(format!("[id={}]", css_string(value))),
            LocatorStrategy::ClassName => Query::Css(format!(".{value}")),
            LocatorStrategy::Name => Query::Css(format!("[name={}]", css_string(value))),
            LocatorStrategy::TagName => Query::Css(value.to_string()),
            LocatorStrategy::LinkText => {
                Query::XPath(format!("//a[normalize-space(.)={}]", xpath_string(value)))
            }
            LocatorStrategy::PartialLinkText => {
                Query::XPath(format!("//a[contains(., {})]", xpath_string(value)))
            }
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.query() {
            Query::Css(selector) => write!(f, "css={selector}"),
            Query::XPath(path) => write!(f, "xpath={path}"),
        }
    }
}

fn css_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn xpath_string(value: &str) -> String {
    if !value.contains('"') {
        format!("\"{value}\"")
    } else if !value.contains('\'') {
        format!("'{value}'")
    } else {
        let parts: Vec<String> = value.split('"').map(|part| format!("\"{part}\"")).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}
