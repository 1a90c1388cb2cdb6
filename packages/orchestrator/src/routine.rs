//! Type-specific generation routines.
//!
//! Each routine resolves its parameters from the activity's custom fields
//! through alias chains, checks the generator's output shape and knows how to
//! synthesize a placeholder artifact.

use build_core::{ActivityKind, BuildError, ConstructionActivity, FieldMap};
use serde_json::{Value, json};

/// Where a parameter falls back to when no alias is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDefault {
    Title,
    Description,
    Value(&'static str),
    Empty,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    /// Custom field keys tried in order.
    pub aliases: &'static [&'static str],
    pub default: ParamDefault,
}

/// Numeric parameter that sets how many items to generate.
#[derive(Debug, Clone, Copy)]
pub struct CountSpec {
    pub name: &'static str,
    pub min: usize,
    pub max: usize,
}

#[derive(Debug)]
pub struct Routine {
    pub kind: ActivityKind,
    pub params: &'static [ParamSpec],
    pub count: Option<CountSpec>,
    /// Key of the generated item list in the output.
    pub items_key: &'static str,
    /// Fields every generated item must carry.
    pub item_fields: &'static [&'static str],
}

const fn param(
    name: &'static str,
    aliases: &'static [&'static str],
    default: ParamDefault,
) -> ParamSpec {
    ParamSpec {
        name,
        aliases,
        default,
    }
}

static QUADRO_INTERATIVO: Routine = Routine {
    kind: ActivityKind::QuadroInterativo,
    params: &[
        param(
            "subject",
            &["Disciplina / Área de conhecimento", "disciplina", "Disciplina", "subject"],
            ParamDefault::Value("Matemática"),
        ),
        param(
            "schoolYear",
            &["Ano / Série", "anoSerie", "Ano de Escolaridade", "schoolYear"],
            ParamDefault::Value("6º Ano"),
        ),
        param(
            "theme",
            &["Tema ou Assunto da aula", "tema", "Tema", "theme"],
            ParamDefault::Title,
        ),
        param(
            "objectives",
            &["Objetivo de aprendizagem da aula", "objetivos", "Objetivos", "objectives"],
            ParamDefault::Description,
        ),
        param(
            "difficultyLevel",
            &["Nível de Dificuldade", "nivelDificuldade", "dificuldade", "difficultyLevel"],
            ParamDefault::Value("Intermediário"),
        ),
        param(
            "activityShown",
            &["Atividade mostrada", "atividadeMostrada", "quadroInterativoCampoEspecifico"],
            ParamDefault::Value("Atividade interativa no quadro"),
        ),
    ],
    count: None,
    items_key: "cards",
    item_fields: &["title", "content"],
};

static QUIZ: Routine = Routine {
    kind: ActivityKind::Quiz,
    params: &[
        param(
            "theme",
            &["tema", "theme", "tituloTemaAssunto", "Tema"],
            ParamDefault::Title,
        ),
        param("subject", &["disciplina", "subject"], ParamDefault::Value("Geral")),
        param("schoolYear", &["anoSerie", "schoolYear"], ParamDefault::Empty),
        param(
            "numberOfQuestions",
            &["numberOfQuestions", "quantidadeQuestoes"],
            ParamDefault::Value("10"),
        ),
        param(
            "format",
            &["format", "formato"],
            ParamDefault::Value("Múltipla Escolha"),
        ),
        param("timePerQuestion", &["timePerQuestion"], ParamDefault::Value("60")),
    ],
    count: Some(CountSpec {
        name: "numberOfQuestions",
        min: 1,
        max: 50,
    }),
    items_key: "questions",
    item_fields: &["question"],
};

static FLASH_CARDS: Routine = Routine {
    kind: ActivityKind::FlashCards,
    params: &[
        param("theme", &["theme", "tema", "Tema"], ParamDefault::Title),
        param("subject", &["subject", "disciplina"], ParamDefault::Value("Geral")),
        param(
            "schoolYear",
            &["schoolYear", "anoEscolaridade", "anoSerie"],
            ParamDefault::Value("Ensino Médio"),
        ),
        param("topicos", &["topicos", "topics"], ParamDefault::Empty),
        param(
            "numberOfFlashcards",
            &["numberOfFlashcards", "numberOfCards", "numCards"],
            ParamDefault::Value("10"),
        ),
        param(
            "difficultyLevel",
            &["difficultyLevel", "nivelDificuldade"],
            ParamDefault::Value("Médio"),
        ),
    ],
    count: Some(CountSpec {
        name: "numberOfFlashcards",
        min: 1,
        max: 50,
    }),
    items_key: "cards",
    item_fields: &["front", "back"],
};

static TESE_REDACAO: Routine = Routine {
    kind: ActivityKind::TeseRedacao,
    params: &[
        param(
            "temaRedacao",
            &["temaRedacao", "theme", "tema"],
            ParamDefault::Title,
        ),
        param("objetivo", &["objetivo", "objectives"], ParamDefault::Description),
        param(
            "nivelDificuldade",
            &["nivelDificuldade", "difficultyLevel"],
            ParamDefault::Value("Médio"),
        ),
        param("competenciasENEM", &["competenciasENEM"], ParamDefault::Empty),
        param(
            "contextoAdicional",
            &["contextoAdicional", "context"],
            ParamDefault::Empty,
        ),
    ],
    count: None,
    items_key: "theses",
    item_fields: &["thesis"],
};

/// Key of the item list in placeholder artifacts of kinds without a routine.
pub const GENERIC_ITEMS_KEY: &str = "items";

impl Routine {
    /// The routine for a kind, `None` for [`ActivityKind::Generic`].
    pub fn for_kind(kind: ActivityKind) -> Option<&'static Routine> {
        match kind {
            ActivityKind::QuadroInterativo => Some(&QUADRO_INTERATIVO),
            ActivityKind::Quiz => Some(&QUIZ),
            ActivityKind::FlashCards => Some(&FLASH_CARDS),
            ActivityKind::TeseRedacao => Some(&TESE_REDACAO),
            ActivityKind::Generic => None,
        }
    }

    /// Resolve every parameter. Fails before any generation call when a
    /// required value is empty or a count is out of range.
    pub fn resolve(&self, activity: &ConstructionActivity) -> Result<FieldMap, BuildError> {
        let mut resolved = FieldMap::new();
        let mut invalid = Vec::new();

        for spec in self.params {
            let value = spec
                .aliases
                .iter()
                .filter_map(|alias| activity.custom_fields.get(*alias))
                .map(|value| value.trim())
                .find(|value| !value.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| match spec.default {
                    ParamDefault::Title => activity.title.trim().to_string(),
                    ParamDefault::Description => activity.description.trim().to_string(),
                    ParamDefault::Value(value) => value.to_string(),
                    ParamDefault::Empty => String::new(),
                });

            if value.is_empty()
                && matches!(spec.default, ParamDefault::Title | ParamDefault::Description)
            {
                invalid.push(spec.name.to_string());
            }
            resolved.insert(spec.name.to_string(), value);
        }

        if let Some(count) = self.count {
            let raw = resolved.get(count.name).map(String::as_str).unwrap_or("");
            match raw.parse::<usize>() {
                Ok(n) if (count.min..=count.max).contains(&n) => {}
                _ => invalid.push(format!(
                    "{} (expected {}-{}, got {:?})",
                    count.name, count.min, count.max, raw
                )),
            }
        }

        if invalid.is_empty() {
            Ok(resolved)
        } else {
            Err(BuildError::validation(invalid))
        }
    }

    /// Requested item count, when the routine has one.
    pub fn requested_count(&self, params: &FieldMap) -> Option<usize> {
        let count = self.count?;
        params.get(count.name)?.parse().ok()
    }

    /// Check the output carries a non-empty item list of well-formed items.
    /// Returns the item count.
    pub fn validate_output(&self, output: &Value) -> Result<usize, String> {
        let items = output
            .get(self.items_key)
            .and_then(Value::as_array)
            .ok_or_else(|| format!("missing '{}' list", self.items_key))?;
        if items.is_empty() {
            return Err(format!("'{}' list is empty", self.items_key));
        }

        for (index, item) in items.iter().enumerate() {
            for field in self.item_fields {
                let present = item
                    .get(*field)
                    .is_some_and(|value| !value.is_null() && value.as_str() != Some(""));
                if !present {
                    return Err(format!(
                        "{}[{}] is missing '{}'",
                        self.items_key, index, field
                    ));
                }
            }
        }
        Ok(items.len())
    }
}

fn subject_of(activity: &ConstructionActivity, params: &FieldMap) -> String {
    ["theme", "temaRedacao"]
        .iter()
        .filter_map(|key| params.get(*key))
        .find(|value| !value.is_empty())
        .cloned()
        .unwrap_or_else(|| activity.title.clone())
}

fn placeholder_item(kind: ActivityKind, index: usize, subject: &str) -> Value {
    match kind {
        ActivityKind::Quiz => json!({
            "id": index,
            "question": format!("Questão {index} sobre {subject}"),
            "options": ["Alternativa A", "Alternativa B", "Alternativa C", "Alternativa D"],
            "correctAnswer": 0,
        }),
        ActivityKind::FlashCards => json!({
            "id": index,
            "front": format!("Conceito {index}: {subject}"),
            "back": format!("Revise o conceito {index} de {subject}."),
        }),
        ActivityKind::QuadroInterativo => json!({
            "id": index,
            "title": format!("{subject} - parte {index}"),
            "content": format!("Conteúdo introdutório {index} sobre {subject}."),
        }),
        ActivityKind::TeseRedacao => json!({
            "id": index,
            "thesis": format!("Tese {index} sobre {subject}"),
            "arguments": [],
        }),
        ActivityKind::Generic => json!({
            "id": index,
            "content": format!("Item {index} sobre {subject}"),
        }),
    }
}

/// Minimal, clearly labelled artifact used when generation failed.
pub fn placeholder(
    activity: &ConstructionActivity,
    params: &FieldMap,
    item_count: usize,
) -> Result<Value, BuildError> {
    if item_count == 0 {
        return Err(BuildError::Fallback(
            "placeholder item count must be positive".to_string(),
        ));
    }
    let kind = activity.kind();
    let items_key = Routine::for_kind(kind).map_or(GENERIC_ITEMS_KEY, |routine| routine.items_key);
    let subject = subject_of(activity, params);
    let items: Vec<Value> = (1..=item_count)
        .map(|index| placeholder_item(kind, index, &subject))
        .collect();

    let mut artifact = serde_json::Map::new();
    artifact.insert("title".to_string(), json!(activity.title));
    artifact.insert("description".to_string(), json!(activity.description));
    artifact.insert("isPlaceholder".to_string(), json!(true));
    artifact.insert(items_key.to_string(), Value::Array(items));
    Ok(Value::Object(artifact))
}
