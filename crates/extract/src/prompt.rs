pub fn build_extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"Extract entities and relationships from the following text.

INSTRUCTIONS:
1. Identify key entities (people, organizations, locations, concepts, technologies, events)
2. Extract directed relationships between those entities
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"text": "Entity name as written", "type": "PERSON|ORGANIZATION|LOCATION|CONCEPT|TECHNOLOGY|EVENT"}}
  ],
  "relationships": [
    {{"source": "Entity name", "relationship": "RELATIONSHIP_TYPE", "target": "Entity name"}}
  ]
}}

RULES:
- "source" and "target" must repeat an entity "text" exactly
- Relationship types are short upper-case verbs: "CAPITAL_OF", "WORKS_FOR", "USES", "LOCATED_IN"
- Use an empty list when nothing is found
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        chunk_text
    )
}

/// Prompt used for short queries, where relationships are not needed.
pub fn build_query_prompt(query: &str) -> String {
    format!(
        r#"List the named entities mentioned in this question.

Output ONLY valid JSON of the form {{"entities": [{{"text": "...", "type": "..."}}], "relationships": []}}

QUESTION:
{}

JSON OUTPUT:"#,
        query
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
