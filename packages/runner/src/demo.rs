//! Local stand-ins for the generation surface and the AI generators.

use std::time::Duration;

use build_core::{ActivityId, ActivityKind, ConstructionActivity, FieldMap};
use orchestrator::routine::Routine;
use orchestrator::{
    CancellationToken, CascadeGenerator, ContentGenerator, GenerationHandle, GenerationOutput,
    GenerationRequest, GeneratorError, GeneratorFuture, GeneratorRegistry, HandleFuture,
    HandleResult,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Items produced when the request does not ask for a count.
const DEFAULT_ITEMS: usize = 3;

#[derive(Debug, Clone)]
struct OpenSurface {
    activity_id: ActivityId,
    activity_type: String,
    fields: FieldMap,
}

/// Surface that renders injected fields into a simple outline.
#[derive(Debug, Default)]
pub struct TemplateSurface {
    current: Mutex<Option<OpenSurface>>,
}

impl GenerationHandle for TemplateSurface {
    fn open<'a>(
        &'a self,
        activity_id: &'a ActivityId,
        activity_type: &'a str,
        fields: &'a FieldMap,
    ) -> HandleFuture<'a, HandleResult<()>> {
        Box::pin(async move {
            let mut current = self.current.lock();
            if let Some(open) = current.as_ref() {
                return Err(format!("surface still open for {}", open.activity_id));
            }
            *current = Some(OpenSurface {
                activity_id: activity_id.clone(),
                activity_type: activity_type.to_string(),
                fields: fields.clone(),
            });
            Ok(())
        })
    }

    fn set_fields<'a>(&'a self, fields: &'a FieldMap) -> HandleFuture<'a, HandleResult<()>> {
        Box::pin(async move {
            match self.current.lock().as_mut() {
                Some(open) => {
                    open.fields.extend(fields.clone());
                    Ok(())
                }
                None => Err("surface is not open".to_string()),
            }
        })
    }

    fn build(&self) -> HandleFuture<'_, HandleResult<GenerationOutput>> {
        Box::pin(async move {
            let open = self
                .current
                .lock()
                .clone()
                .ok_or_else(|| "surface is not open".to_string())?;

            let title = open.fields.get("title").cloned().unwrap_or_default();
            let items: Vec<Value> = open
                .fields
                .iter()
                .filter(|(key, value)| {
                    !value.is_empty() && !matches!(key.as_str(), "title" | "description")
                })
                .map(|(key, value)| json!({"label": key, "text": value}))
                .collect();

            Ok(GenerationOutput::new(json!({
                "type": open.activity_type,
                "title": title,
                "items": items,
            })))
        })
    }

    fn close(&self) -> HandleFuture<'_, ()> {
        Box::pin(async move {
            self.current.lock().take();
        })
    }

    fn is_open(&self) -> bool {
        self.current.lock().is_some()
    }
}

/// Generator that fills every item field of a routine from the theme.
#[derive(Debug, Clone)]
pub struct TemplateGenerator {
    latency: Duration,
}

impl TemplateGenerator {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl ContentGenerator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    fn generate(&self, request: &GenerationRequest, cancel: CancellationToken) -> GeneratorFuture {
        let request = request.clone();
        let latency = self.latency;
        Box::pin(async move {
            let routine = Routine::for_kind(request.kind).ok_or_else(|| {
                GeneratorError::Request(format!("no template for {}", request.kind))
            })?;

            tokio::select! {
                _ = cancel.cancelled() => return Err(GeneratorError::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }

            let theme = request
                .parameter("theme")
                .or_else(|| request.parameter("temaRedacao"))
                .filter(|theme| !theme.is_empty())
                .unwrap_or(request.title.as_str())
                .to_string();
            let count = routine
                .requested_count(&request.parameters)
                .unwrap_or(DEFAULT_ITEMS);

            let items: Vec<Value> = (1..=count)
                .map(|index| {
                    let item: serde_json::Map<String, Value> = routine
                        .item_fields
                        .iter()
                        .map(|field| (field.to_string(), json!(format!("{theme} ({field} {index})"))))
                        .collect();
                    Value::Object(item)
                })
                .collect();

            let mut artifact = serde_json::Map::new();
            artifact.insert("title".to_string(), json!(request.title));
            artifact.insert("description".to_string(), json!(request.description));
            artifact.insert(routine.items_key.to_string(), Value::Array(items));
            Ok(Value::Object(artifact))
        })
    }
}

/// Registry with the template generator behind a cascade for every routine.
pub fn generators(latency: Duration) -> GeneratorRegistry {
    let mut registry = GeneratorRegistry::new();
    for kind in ActivityKind::SPECIFIC {
        registry.register(
            kind,
            CascadeGenerator::new(format!("{kind}-cascade")).then(TemplateGenerator::new(latency)),
        );
    }
    registry
}

/// Jobs used when no jobs file is given.
pub fn sample_activities() -> Vec<ConstructionActivity> {
    vec![
        ConstructionActivity::new(
            "quiz-fracoes",
            "Quiz de frações",
            "Frações equivalentes para o 5º ano",
            "quiz-interativo",
        )
        .with_field("tema", "Frações equivalentes")
        .with_field("numberOfQuestions", "4"),
        ConstructionActivity::new(
            "cards-sistema-solar",
            "Flash cards do sistema solar",
            "Planetas e suas características",
            "flash-cards",
        ),
        ConstructionActivity::new(
            "mapa-agua",
            "Mapa mental do ciclo da água",
            "Etapas do ciclo da água",
            "mapa-mental",
        )
        .with_field("tema", "Ciclo da água"),
        ConstructionActivity::new("sem-titulo", "", "Atividade sem título", "quiz-interativo"),
    ]
}
