//! `form` completion: validates submitted text and media per field.
//!
//! Input shape: `{ "<field>": { "text": "...", "media": [ ... ] } }`.

use crate::engine::executor::ExecContext;
use crate::error::{MissionError, MissionResult};
use crate::model::complete::Complete;
use crate::model::mission::Mission;
use crate::rules::completions::invalid_config;
use crate::rules::registry::RegistryError;
use crate::rules::{decode_config, Completion, Flow};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const TAG: &str = "form";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min_text: Option<usize>,
    #[serde(default)]
    pub max_text: Option<usize>,
    #[serde(default)]
    pub min_media: Option<usize>,
    #[serde(default)]
    pub max_media: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    id: String,
    pub fields: Vec<FormField>,
}

impl Form {
    pub fn from_raw(id: String, raw: &Value) -> Result<Self, RegistryError> {
        let config: Config = decode_config(TAG, raw)?;
        for (index, field) in config.fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(invalid_config(TAG, format!("field {index} has no name")));
            }
            if config.fields[..index].iter().any(|other| other.name == field.name) {
                return Err(invalid_config(TAG, format!("duplicate field `{}`", field.name)));
            }
        }
        Ok(Self {
            id,
            fields: config.fields,
        })
    }

    fn validate(&self, submitted: &Map<String, Value>) -> Result<(), String> {
        for key in submitted.keys() {
            if !self.fields.iter().any(|field| &field.name == key) {
                return Err(format!("field `{key}` is not part of the form"));
            }
        }

        for field in &self.fields {
            let value = submitted.get(&field.name);
            if value.is_some_and(|value| !value.is_object() && !value.is_null()) {
                return Err(format!("field `{}` must be an object", field.name));
            }
            let text_len = value
                .and_then(|value| value.get("text"))
                .and_then(Value::as_str)
                .map_or(0, |text| text.trim().chars().count());
            let media_len = value
                .and_then(|value| value.get("media"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);

            if text_len == 0 && media_len == 0 {
                if field.required {
                    return Err(format!("field `{}` is required", field.name));
                }
                continue;
            }
            check_range(&field.name, "text length", text_len, field.min_text, field.max_text)?;
            check_range(&field.name, "media count", media_len, field.min_media, field.max_media)?;
        }
        Ok(())
    }
}

fn check_range(
    field: &str,
    what: &str,
    value: usize,
    min: Option<usize>,
    max: Option<usize>,
) -> Result<(), String> {
    if let Some(min) = min {
        if value < min {
            return Err(format!("field `{field}` {what} {value} is below {min}"));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Err(format!("field `{field}` {what} {value} is above {max}"));
        }
    }
    Ok(())
}

impl Completion for Form {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn complete(
        &self,
        ctx: &ExecContext<'_>,
        _mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        let submitted = match ctx.input_for(&self.id) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(MissionError::validation(format!(
                    "form `{}` input must be an object",
                    self.id
                )));
            }
        };
        self.validate(&submitted).map_err(MissionError::Validation)?;
        complete
            .result
            .insert(self.id.clone(), Value::Object(submitted));
        Ok(Flow::Continue)
    }
}
