//! Exercise generation.
//!
//! Prompts and passages come from the language model when it answers in time,
//! and otherwise from built-in tables keyed by language and difficulty, so a
//! session always has a next task.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::difficulty::Difficulty;
use crate::error::ServiceKind;
use crate::services::{with_timeout, CompletionRequest, LanguageModel};

/// Register a difficulty level asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyBand {
    /// Levels 1-3.
    Basic,
    /// Levels 4-6.
    Intermediate,
    /// Levels 7-10.
    Advanced,
}

impl DifficultyBand {
    /// Band of a difficulty level.
    #[must_use]
    pub const fn of(difficulty: Difficulty) -> Self {
        match difficulty.level() {
            0..=3 => Self::Basic,
            4..=6 => Self::Intermediate,
            _ => Self::Advanced,
        }
    }

    /// Qualitative description handed to the model.
    #[must_use]
    pub const fn register(self) -> &'static str {
        match self {
            Self::Basic => "present tense, basic everyday vocabulary and short sentences",
            Self::Intermediate => "a mix of past, present and future tenses on everyday topics",
            Self::Advanced => {
                "idiomatic, abstract or technical language with complex sentence structure"
            }
        }
    }
}

/// Produces speaking prompts and reading passages.
#[derive(Clone)]
pub struct ExerciseGenerator {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl std::fmt::Debug for ExerciseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExerciseGenerator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ExerciseGenerator {
    /// Creates a generator over `model`, bounding each call by `timeout`.
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// A conversation question for a learner of `language`.
    pub async fn speaking_prompt(
        &self,
        language: &str,
        difficulty: Difficulty,
        previous: &[String],
    ) -> String {
        let band = DifficultyBand::of(difficulty);
        let request = CompletionRequest::text(
            format!(
                "You write conversation questions for a {language} speaking assessment. \
                 Reply with one open question only, no preamble. The question should invite \
                 an answer using {}.",
                band.register()
            ),
            format!(
                "Difficulty level: {difficulty}/10\nAvoid these topics:\n{}",
                bullet_list(previous)
            ),
        );

        match self.ask(request, previous).await {
            Some(prompt) => prompt,
            None => canned_speaking_prompt(language, difficulty, previous).to_string(),
        }
    }

    /// A passage written in `language` for the learner to translate.
    pub async fn reading_passage(
        &self,
        language: &str,
        difficulty: Difficulty,
        previous: &[String],
    ) -> String {
        let band = DifficultyBand::of(difficulty);
        let request = CompletionRequest::text(
            format!(
                "You write short reading passages for a {language} translation assessment. \
                 Reply with the passage only, written in {language}, two to four sentences \
                 using {}.",
                band.register()
            ),
            format!(
                "Difficulty level: {difficulty}/10\nDo not repeat these passages:\n{}",
                bullet_list(previous)
            ),
        );

        match self.ask(request, previous).await {
            Some(passage) => passage,
            None => canned_reading_passage(language, difficulty, previous).to_string(),
        }
    }

    /// Model reply, or `None` when it failed, was empty, or repeats a previous text.
    async fn ask(&self, request: CompletionRequest, previous: &[String]) -> Option<String> {
        let reply = with_timeout(
            ServiceKind::LanguageModel,
            self.timeout,
            self.model.complete(request),
        )
        .await;

        match reply {
            Ok(text) => {
                let cleaned = clean_reply(&text);
                if cleaned.is_empty() || is_repeat(&cleaned, previous) {
                    debug!("Generated text empty or repeated, using built-in table");
                    None
                } else {
                    Some(cleaned)
                }
            }
            Err(e) => {
                warn!(error = %e, "Generation failed, using built-in table");
                None
            }
        }
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trims whitespace and one layer of surrounding quotes.
fn clean_reply(text: &str) -> String {
    let trimmed = text.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

fn is_repeat(text: &str, previous: &[String]) -> bool {
    previous
        .iter()
        .any(|p| p.trim().eq_ignore_ascii_case(text.trim()))
}

// ============================================================================
// Built-in Tables
// ============================================================================

// Each table is indexed by difficulty level minus one.

const ENGLISH_PROMPTS: [&str; 10] = [
    "What is your name and where are you from?",
    "Describe your daily routine.",
    "Talk about your favorite hobby.",
    "Describe something interesting you did last week.",
    "What are your plans for the future?",
    "Explain a challenge you've overcome.",
    "Discuss the pros and cons of social media.",
    "Describe a hypothetical situation where you had to make a difficult decision.",
    "Analyze the impact of technology on modern society.",
    "Debate whether artificial intelligence will ultimately benefit or harm humanity.",
];

const SPANISH_PROMPTS: [&str; 10] = [
    "¿Cómo te llamas y de dónde eres?",
    "Describe tu rutina diaria.",
    "Háblame de tu pasatiempo favorito.",
    "Cuéntame algo interesante que hiciste la semana pasada.",
    "¿Qué planes tienes para el futuro?",
    "Explica un desafío que hayas superado.",
    "Comenta las ventajas y desventajas de las redes sociales.",
    "Describe una situación en la que tuviste que tomar una decisión difícil.",
    "Analiza el impacto de la tecnología en la sociedad moderna.",
    "¿Crees que la inteligencia artificial acabará beneficiando o perjudicando a la humanidad?",
];

const FRENCH_PROMPTS: [&str; 10] = [
    "Comment tu t'appelles et d'où viens-tu ?",
    "Décris ta routine quotidienne.",
    "Parle-moi de ton passe-temps préféré.",
    "Raconte-moi quelque chose d'intéressant que tu as fait la semaine dernière.",
    "Quels sont tes projets pour l'avenir ?",
    "Explique un défi que tu as surmonté.",
    "Discute des avantages et des inconvénients des réseaux sociaux.",
    "Décris une situation où tu as dû prendre une décision difficile.",
    "Analyse l'impact de la technologie sur la société moderne.",
    "L'intelligence artificielle finira-t-elle par profiter ou nuire à l'humanité ?",
];

const GERMAN_PROMPTS: [&str; 10] = [
    "Wie heißt du und woher kommst du?",
    "Beschreibe deinen Tagesablauf.",
    "Erzähl mir von deinem Lieblingshobby.",
    "Erzähl mir von etwas Interessantem, das du letzte Woche gemacht hast.",
    "Was sind deine Pläne für die Zukunft?",
    "Erkläre eine Herausforderung, die du gemeistert hast.",
    "Diskutiere die Vor- und Nachteile sozialer Medien.",
    "Beschreibe eine Situation, in der du eine schwierige Entscheidung treffen musstest.",
    "Analysiere den Einfluss der Technologie auf die moderne Gesellschaft.",
    "Wird künstliche Intelligenz der Menschheit letztlich nützen oder schaden?",
];

const SPANISH_PASSAGES: [&str; 10] = [
    "El gato es negro. Duerme en el sofá.",
    "Ayer fui al mercado. Compré manzanas y pan.",
    "Mi familia vive en una casa pequeña cerca de la playa. Nos encanta nadar en verano.",
    "El año pasado viajé a México por primera vez. La comida era increíble y la gente muy amable.",
    "Si tuviera más tiempo, aprendería a tocar la guitarra. La música siempre ha sido importante para mí.",
    "La empresa anunció que se expandiría a nuevos mercados el próximo trimestre, lo que sorprendió a muchos inversores.",
    "A pesar de los desafíos que plantea el cambio climático, la adopción de energías renovables sigue acelerándose en todo el mundo.",
    "El uso sutil de la metáfora a lo largo de la novela subraya la lucha interna del protagonista.",
    "Los neurocientíficos han descubierto que la plasticidad sináptica desempeña un papel crucial en la consolidación de la memoria durante el sueño.",
    "Las ramificaciones geopolíticas de este gesto diplomático podrían redefinir el equilibrio de poder en toda la región.",
];

const FRENCH_PASSAGES: [&str; 10] = [
    "Le chat est noir. Il dort sur le canapé.",
    "Hier, je suis allé au marché. J'ai acheté des pommes et du pain.",
    "Ma famille habite dans une petite maison près de la plage. Nous aimons nager en été.",
    "L'année dernière, j'ai voyagé en Espagne pour la première fois. La nourriture était incroyable.",
    "Si j'avais plus de temps, j'apprendrais à jouer de la guitare. La musique a toujours compté pour moi.",
    "L'entreprise a annoncé qu'elle s'étendrait sur de nouveaux marchés le trimestre prochain, ce qui a surpris les investisseurs.",
    "Malgré les défis posés par le changement climatique, l'adoption des énergies renouvelables continue de s'accélérer.",
    "L'usage subtil de la métaphore tout au long du roman souligne la lutte intérieure du protagoniste.",
    "Les neuroscientifiques ont découvert que la plasticité synaptique joue un rôle crucial dans la consolidation de la mémoire pendant le sommeil.",
    "Les ramifications géopolitiques de cette ouverture diplomatique pourraient redessiner l'équilibre des pouvoirs dans toute la région.",
];

const GERMAN_PASSAGES: [&str; 10] = [
    "Die Katze ist schwarz. Sie schläft auf dem Sofa.",
    "Gestern bin ich auf den Markt gegangen. Ich habe Äpfel und Brot gekauft.",
    "Meine Familie wohnt in einem kleinen Haus am Strand. Im Sommer schwimmen wir gern.",
    "Letztes Jahr bin ich zum ersten Mal nach Spanien gereist. Das Essen war unglaublich.",
    "Wenn ich mehr Zeit hätte, würde ich Gitarre spielen lernen. Musik war mir immer wichtig.",
    "Das Unternehmen kündigte an, im nächsten Quartal in neue Märkte zu expandieren, was viele Anleger überraschte.",
    "Trotz der Herausforderungen des Klimawandels nimmt die Nutzung erneuerbarer Energien weltweit weiter zu.",
    "Der subtile Einsatz von Metaphern im gesamten Roman unterstreicht den inneren Kampf des Protagonisten.",
    "Neurowissenschaftler haben entdeckt, dass synaptische Plastizität bei der Gedächtniskonsolidierung im Schlaf eine entscheidende Rolle spielt.",
    "Die geopolitischen Folgen dieser diplomatischen Annäherung könnten das Machtgleichgewicht in der gesamten Region verändern.",
];

const ENGLISH_PASSAGES: [&str; 10] = [
    "The cat is black. It sleeps on the sofa.",
    "Yesterday I went to the market. I bought apples and bread.",
    "My family lives in a small house near the beach. We love to swim in summer.",
    "Last year, I traveled to Spain for the first time. The food was incredible and the people were very friendly.",
    "If I had more time, I would learn to play the guitar. Music has always been important to me.",
    "The company announced that it would be expanding into new markets next quarter, which surprised many investors.",
    "Despite the challenges posed by climate change, renewable energy adoption continues to accelerate worldwide.",
    "The author's subtle use of metaphor throughout the novel serves to underscore the protagonist's internal struggle.",
    "Neuroscientists have discovered that synaptic plasticity plays a crucial role in memory consolidation during REM sleep.",
    "The geopolitical ramifications of this diplomatic overture could potentially reshape the balance of power across the entire region.",
];

fn prompts_for(language: &str) -> &'static [&'static str; 10] {
    match language.trim().to_lowercase().as_str() {
        "spanish" => &SPANISH_PROMPTS,
        "french" => &FRENCH_PROMPTS,
        "german" => &GERMAN_PROMPTS,
        _ => &ENGLISH_PROMPTS,
    }
}

fn passages_for(language: &str) -> &'static [&'static str; 10] {
    match language.trim().to_lowercase().as_str() {
        "spanish" => &SPANISH_PASSAGES,
        "french" => &FRENCH_PASSAGES,
        "german" => &GERMAN_PASSAGES,
        _ => &ENGLISH_PASSAGES,
    }
}

/// Entry for `difficulty`, or the nearest level whose entry is unused.
///
/// Falls back to the exact level when every entry has been used.
fn pick<'a>(table: &'a [&'a str; 10], difficulty: Difficulty, previous: &[String]) -> &'a str {
    let index = usize::from(difficulty.level().saturating_sub(1)).min(table.len() - 1);
    let unused = |i: usize| !is_repeat(table[i], previous);

    (0..table.len())
        .flat_map(|distance| {
            let below = index.checked_sub(distance);
            let above = (distance > 0).then_some(index + distance);
            [below, above]
        })
        .flatten()
        .filter(|&i| i < table.len())
        .find(|&i| unused(i))
        .map_or(table[index], |i| table[i])
}

/// Built-in conversation question in `language` (English for languages without a table).
#[must_use]
pub fn canned_speaking_prompt(
    language: &str,
    difficulty: Difficulty,
    previous: &[String],
) -> &'static str {
    pick(prompts_for(language), difficulty, previous)
}

/// Built-in reading passage in `language` (English for languages without a table).
#[must_use]
pub fn canned_reading_passage(
    language: &str,
    difficulty: Difficulty,
    previous: &[String],
) -> &'static str {
    pick(passages_for(language), difficulty, previous)
}
